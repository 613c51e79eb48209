//! Telegram adapter (teloxide).
//!
//! Implements the `tglog-core` MessagingPort over the Bot API and wires a
//! config into a ready-to-install tracing layer.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use teloxide::{
    payloads::SendMessage,
    requests::Payload,
    types::{ChatId, ParseMode, Recipient},
};
use tokio::time::sleep;

use tglog_core::{
    config::{normalize_base_url, TelegramLoggerConfig, TELEGRAM_MESSAGE_LIMIT},
    domain::{BotToken, ChatTarget},
    errors::Error,
    messaging::port::MessagingPort,
    LayerHandle, Result, TelegramLayer, TelegramLoggerHandler,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    retry_on_flood: bool,
}

/// Why one `sendMessage` call failed.
#[derive(Debug)]
enum SendError {
    RetryAfter(Duration),
    Api(Error),
}

impl TelegramMessenger {
    /// Build a client against `base_url` (the public Bot API or a bridge).
    ///
    /// The method path is appended to `base_url` as is, so a bridge mounted
    /// under a path prefix keeps it.
    pub fn new(token: &BotToken, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        let endpoint = Self::method_url(&normalize_base_url(base_url)?, token, SendMessage::NAME)?;

        Ok(Self {
            http,
            endpoint,
            retry_on_flood: false,
        })
    }

    /// Like [`Self::new`]; also retries once on a flood-control reply when
    /// `retry_on_flood` is set.
    pub fn from_config(cfg: &TelegramLoggerConfig) -> Result<Self> {
        let mut messenger = Self::new(&cfg.bot_token, &cfg.base_url, cfg.request_timeout)?;
        messenger.retry_on_flood = cfg.retry_on_flood;
        Ok(messenger)
    }

    /// `{base}bot{token}/{method}`. `base` must end with `/`.
    fn method_url(base: &str, token: &BotToken, method: &str) -> Result<reqwest::Url> {
        // String concatenation: `Url::join` would read `bot123:` as a scheme.
        let raw = format!("{base}bot{}/{method}", token.expose());
        reqwest::Url::parse(&raw).map_err(|e| Error::Config(format!("TELEGRAM_BASE_URL: {e}")))
    }

    fn recipient(chat: &ChatTarget) -> Recipient {
        match chat {
            ChatTarget::Id(id) => Recipient::Id(ChatId(*id)),
            ChatTarget::Username(name) => Recipient::ChannelUsername(name.clone()),
        }
    }

    fn payload(chat: &ChatTarget, html: &str) -> SendMessage {
        let mut payload = SendMessage::new(Self::recipient(chat), html);
        payload.parse_mode = Some(ParseMode::Html);
        payload.disable_web_page_preview = Some(true);
        payload
    }

    async fn post(&self, payload: &SendMessage) -> std::result::Result<(), SendError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| SendError::Api(Error::External(format!("telegram request error: {e}"))))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let reply: Value = serde_json::from_str(&body).map_err(|_| {
            SendError::Api(Error::External(format!(
                "telegram error: {status} {}",
                body.chars().take(200).collect::<String>()
            )))
        })?;

        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }
        if let Some(secs) = reply
            .pointer("/parameters/retry_after")
            .and_then(Value::as_u64)
        {
            return Err(SendError::RetryAfter(Duration::from_secs(secs)));
        }
        let description = reply
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        Err(SendError::Api(Error::External(format!(
            "telegram error: {status} {description}"
        ))))
    }

    async fn with_retry(&self, payload: &SendMessage) -> Result<()> {
        let max_retries = usize::from(self.retry_on_flood);
        let mut attempts = 0usize;
        loop {
            match self.post(payload).await {
                Ok(()) => return Ok(()),
                Err(SendError::RetryAfter(d)) if attempts < max_retries => {
                    attempts += 1;
                    tracing::debug!(retry_after = ?d, "telegram flood control, retrying");
                    sleep(d).await;
                }
                Err(SendError::RetryAfter(d)) => {
                    return Err(Error::External(format!(
                        "telegram flood control: retry after {}s",
                        d.as_secs()
                    )))
                }
                Err(SendError::Api(e)) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn max_message_len(&self) -> usize {
        TELEGRAM_MESSAGE_LIMIT
    }

    async fn send_html(&self, chat: &ChatTarget, html: &str) -> Result<()> {
        self.with_retry(&Self::payload(chat, html)).await
    }
}

/// Handler delivering through the Bot API described by `cfg`.
pub fn handler_from_config(cfg: TelegramLoggerConfig) -> Result<TelegramLoggerHandler> {
    let messenger = Arc::new(TelegramMessenger::from_config(&cfg)?);
    Ok(TelegramLoggerHandler::new(cfg, messenger))
}

/// Layer + worker handle for `cfg`. Must be called inside a tokio runtime.
pub fn layer_from_config(cfg: TelegramLoggerConfig) -> Result<(TelegramLayer, LayerHandle)> {
    Ok(TelegramLayer::spawn(handler_from_config(cfg)?))
}
