use std::{env, fs, path::Path, time::Duration};

use tracing::Level;

use crate::{
    domain::{BotToken, ChatTarget},
    errors::Error,
    Result,
};

pub const DEFAULT_BASE_URL: &str = "https://api.telegram.org/";
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;
const MIN_MESSAGE_LIMIT: usize = 64;

/// Typed configuration for the Telegram logger.
///
/// Variable names follow the `TELEGRAM_LOGGER_*` convention so an existing
/// deployment's `.env` keeps working.
#[derive(Clone, Debug)]
pub struct TelegramLoggerConfig {
    // Telegram
    pub bot_token: BotToken,
    pub chat_id: Option<ChatTarget>,
    pub base_url: String,

    // Record shaping
    pub application_name: String,
    pub level: Level,
    pub log_request_data: bool,
    pub log_trace_exception: bool,
    pub ignore_messages: Vec<String>,
    pub ignore_context: Vec<String>,

    // Delivery
    pub message_limit: usize,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
    pub retry_on_flood: bool,
}

impl Default for TelegramLoggerConfig {
    fn default() -> Self {
        Self {
            bot_token: BotToken::default(),
            chat_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            application_name: "app".to_string(),
            level: Level::ERROR,
            log_request_data: true,
            log_trace_exception: true,
            ignore_messages: Vec::new(),
            ignore_context: Vec::new(),
            message_limit: TELEGRAM_MESSAGE_LIMIT,
            request_timeout: Duration::from_millis(10_000),
            queue_capacity: 256,
            retry_on_flood: false,
        }
    }
}

impl TelegramLoggerConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Load from an arbitrary key lookup. `from_env` is this over `std::env`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let bot_token = BotToken::new(lookup("TELEGRAM_LOGGER_BOT_TOKEN").unwrap_or_default());
        let chat_id = lookup("TELEGRAM_LOGGER_CHAT_ID").and_then(|s| ChatTarget::parse(&s));

        let base_url = match lookup("TELEGRAM_BASE_URL").and_then(non_empty) {
            Some(url) => normalize_base_url(&url)?,
            None => defaults.base_url,
        };

        let application_name = lookup("APP_NAME")
            .and_then(non_empty)
            .unwrap_or(defaults.application_name);

        let level = match lookup("TELEGRAM_LOGGER_LEVEL").and_then(non_empty) {
            Some(raw) => parse_level(&raw).ok_or_else(|| {
                Error::Config(format!("TELEGRAM_LOGGER_LEVEL: unknown level {raw:?}"))
            })?,
            None => defaults.level,
        };

        let log_request_data = lookup("TELEGRAM_LOGGER_LOG_REQUEST_DATA")
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.log_request_data);
        let log_trace_exception = lookup("TELEGRAM_LOGGER_LOG_TRACE_EXCEPTION")
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.log_trace_exception);

        let ignore_messages = parse_csv(lookup("TELEGRAM_LOGGER_IGNORE_MESSAGES"));
        let ignore_context = parse_csv(lookup("TELEGRAM_LOGGER_IGNORE_CONTEXT"));

        let message_limit = match lookup("TELEGRAM_LOGGER_MESSAGE_LIMIT").and_then(non_empty) {
            Some(raw) => parse_message_limit(&raw)?,
            None => defaults.message_limit,
        };
        let request_timeout = lookup("TELEGRAM_LOGGER_TIMEOUT_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);
        let queue_capacity = lookup("TELEGRAM_LOGGER_QUEUE_CAPACITY")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.queue_capacity);
        let retry_on_flood = lookup("TELEGRAM_LOGGER_RETRY_ON_FLOOD")
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.retry_on_flood);

        Ok(Self {
            bot_token,
            chat_id,
            base_url,
            application_name,
            level,
            log_request_data,
            log_trace_exception,
            ignore_messages,
            ignore_context,
            message_limit,
            request_timeout,
            queue_capacity,
            retry_on_flood,
        })
    }

    /// True when both a token and a destination chat are configured.
    pub fn is_deliverable(&self) -> bool {
        !self.bot_token.is_empty() && self.chat_id.is_some()
    }
}

/// Parse a level name. Accepts `tracing` names plus the syslog-style names
/// most logging frameworks use (`notice`, `warning`, `critical`, ...).
pub fn parse_level(raw: &str) -> Option<Level> {
    match raw.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" | "notice" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" | "critical" | "alert" | "emergency" => Some(Level::ERROR),
        _ => None,
    }
}

/// Validate the base URL and give it a trailing `/`.
///
/// Methods are addressed at `{base_url}bot{token}/{method}`, so a path
/// prefix such as a bridge's `/tg` is kept.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let mut url = raw.trim().to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    reqwest::Url::parse(&url)
        .map_err(|e| Error::Config(format!("TELEGRAM_BASE_URL: invalid url {raw:?}: {e}")))?;
    Ok(url)
}

fn parse_message_limit(raw: &str) -> Result<usize> {
    let limit = raw.trim().parse::<usize>().map_err(|_| {
        Error::Config(format!("TELEGRAM_LOGGER_MESSAGE_LIMIT: not a number: {raw:?}"))
    })?;
    if limit < MIN_MESSAGE_LIMIT {
        return Err(Error::Config(format!(
            "TELEGRAM_LOGGER_MESSAGE_LIMIT must be at least {MIN_MESSAGE_LIMIT}"
        )));
    }
    Ok(limit.min(TELEGRAM_MESSAGE_LIMIT))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Set every `.env` entry whose key is not already in the environment.
/// Returns how many variables were set; a missing file sets none.
fn load_dotenv_if_present(path: &Path) -> usize {
    let Ok(contents) = fs::read_to_string(path) else {
        return 0;
    };

    let mut applied = 0;
    for (key, value) in parse_dotenv(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(&key, value);
            applied += 1;
        }
    }
    applied
}

/// `KEY=value` pairs in file order. Blank lines, `#` comments and lines
/// without a key are skipped; an `export ` prefix and one pair of matching
/// quotes around the value are stripped.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// `.env` template listing every variable the logger reads.
pub const ENV_TEMPLATE: &str = "\
# Token of the Telegram bot that sends the messages.
TELEGRAM_LOGGER_BOT_TOKEN=
# Id of the chat or group (or @channel) that receives the messages.
TELEGRAM_LOGGER_CHAT_ID=
# Bot API base URL. Point it at a bridge (path allowed) where api.telegram.org is blocked.
TELEGRAM_BASE_URL=https://api.telegram.org/
# Minimum level forwarded to Telegram.
TELEGRAM_LOGGER_LEVEL=error
TELEGRAM_LOGGER_LOG_REQUEST_DATA=true
TELEGRAM_LOGGER_LOG_TRACE_EXCEPTION=true
# Comma separated message prefixes that are never forwarded.
TELEGRAM_LOGGER_IGNORE_MESSAGES=
# Comma separated substrings; records whose context contains one are dropped.
TELEGRAM_LOGGER_IGNORE_CONTEXT=
TELEGRAM_LOGGER_MESSAGE_LIMIT=4096
TELEGRAM_LOGGER_TIMEOUT_MS=10000
TELEGRAM_LOGGER_QUEUE_CAPACITY=256
TELEGRAM_LOGGER_RETRY_ON_FLOOD=false
APP_NAME=app
";

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<TelegramLoggerConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TelegramLoggerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.level, Level::ERROR);
        assert!(cfg.log_request_data);
        assert!(cfg.log_trace_exception);
        assert_eq!(cfg.message_limit, 4096);
        assert!(!cfg.is_deliverable());
    }

    #[test]
    fn reads_lists_and_drops_empty_entries() {
        let cfg = load(&[
            ("TELEGRAM_LOGGER_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_LOGGER_CHAT_ID", "-1001"),
            ("TELEGRAM_LOGGER_IGNORE_MESSAGES", "Unauthenticated, ,Route [login],"),
            ("TELEGRAM_LOGGER_IGNORE_CONTEXT", "bot-crawler"),
            ("TELEGRAM_LOGGER_LOG_REQUEST_DATA", "false"),
        ])
        .unwrap();
        assert!(cfg.is_deliverable());
        assert_eq!(cfg.chat_id, Some(ChatTarget::Id(-1001)));
        assert_eq!(cfg.ignore_messages, vec!["Unauthenticated", "Route [login]"]);
        assert_eq!(cfg.ignore_context, vec!["bot-crawler"]);
        assert!(!cfg.log_request_data);
    }

    #[test]
    fn accepts_framework_level_aliases() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("CRITICAL"), Some(Level::ERROR));
        assert_eq!(parse_level("notice"), Some(Level::INFO));
        assert_eq!(parse_level("verbose"), None);

        let err = load(&[("TELEGRAM_LOGGER_LEVEL", "loud")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn normalizes_bridge_base_url() {
        let cfg = load(&[("TELEGRAM_BASE_URL", "https://bridge.example.com/tg")]).unwrap();
        assert_eq!(cfg.base_url, "https://bridge.example.com/tg/");

        assert!(load(&[("TELEGRAM_BASE_URL", "not a url")]).is_err());
    }

    #[test]
    fn parses_dotenv_lines() {
        let pairs = parse_dotenv(
            "# comment\n\nA=1\nexport B = \"two words\"\nC='x'\n=orphan\nno_equals\nD=\"\n",
        );
        let pairs: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("A", "1"), ("B", "two words"), ("C", "x"), ("D", "\"")]
        );
    }

    #[test]
    fn dotenv_does_not_override_existing_variables() {
        let dir = env::temp_dir().join(format!("tglog-dotenv-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        fs::write(
            &path,
            "TGLOG_TEST_DOTENV_KEPT=from-file\nTGLOG_TEST_DOTENV_NEW=from-file\n",
        )
        .unwrap();

        env::set_var("TGLOG_TEST_DOTENV_KEPT", "from-env");
        env::remove_var("TGLOG_TEST_DOTENV_NEW");

        assert_eq!(load_dotenv_if_present(&path), 1);
        assert_eq!(env::var("TGLOG_TEST_DOTENV_KEPT").unwrap(), "from-env");
        assert_eq!(env::var("TGLOG_TEST_DOTENV_NEW").unwrap(), "from-file");
        assert_eq!(load_dotenv_if_present(&dir.join("missing.env")), 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn message_limit_is_clamped_to_telegram_max() {
        let cfg = load(&[("TELEGRAM_LOGGER_MESSAGE_LIMIT", "9000")]).unwrap();
        assert_eq!(cfg.message_limit, TELEGRAM_MESSAGE_LIMIT);
        assert!(load(&[("TELEGRAM_LOGGER_MESSAGE_LIMIT", "10")]).is_err());
    }
}
