use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

use tglog_core::{
    config::{TelegramLoggerConfig, ENV_TEMPLATE},
    record::{LogRecord, RequestContext},
    Delivery,
};

const DEFAULT_MESSAGE: &str = "tglog test message";

#[derive(Parser, Debug)]
#[command(name = "tglog", version, about = "Forward log records to a Telegram chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Send one record at the configured level and report the outcome
    Send {
        /// Message text (words are joined with spaces)
        message: Vec<String>,
    },
    /// Print the formatted message without sending it
    Preview {
        /// Message text (words are joined with spaces)
        message: Vec<String>,
    },
    /// Forward every non-empty stdin line as a log record
    Pipe,
    /// Print the environment template
    Env,
}

fn message_text(words: &[String]) -> String {
    if words.is_empty() {
        DEFAULT_MESSAGE.to_string()
    } else {
        words.join(" ")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Send { message } => send(&message_text(&message)).await,
        Command::Preview { message } => preview(&message_text(&message)),
        Command::Pipe => pipe().await,
        Command::Env => {
            print!("{ENV_TEMPLATE}");
            Ok(())
        }
    }
}

fn cli_record(level: Level, message: &str) -> LogRecord {
    LogRecord::new(level, message)
        .with_request(RequestContext::default().with_url("cli://tglog"))
        .with_extra("host", hostname())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "-".to_string())
}

async fn send(message: &str) -> anyhow::Result<()> {
    tglog_core::logging::init("tglog")?;
    let cfg = TelegramLoggerConfig::from_env().context("loading telegram logger config")?;
    if !cfg.is_deliverable() {
        bail!("TELEGRAM_LOGGER_BOT_TOKEN and TELEGRAM_LOGGER_CHAT_ID must be set");
    }

    let level = cfg.level;
    let handler = tglog_telegram::handler_from_config(cfg)?;
    match handler.write(&cli_record(level, message)).await {
        Delivery::Sent => {
            tracing::info!("message sent");
            Ok(())
        }
        Delivery::Skipped(reason) => bail!("message not sent: {reason:?}"),
        Delivery::Failed => bail!("telegram rejected the message (run with RUST_LOG=debug)"),
    }
}

fn preview(message: &str) -> anyhow::Result<()> {
    let cfg = TelegramLoggerConfig::from_env().context("loading telegram logger config")?;
    let level = cfg.level;
    let handler = tglog_telegram::handler_from_config(cfg)?;
    match handler.format(&cli_record(level, message)) {
        Some(text) => println!("{text}"),
        None => println!("(dropped by ignore rules)"),
    }
    Ok(())
}

async fn pipe() -> anyhow::Result<()> {
    let cfg = TelegramLoggerConfig::from_env().context("loading telegram logger config")?;
    let level = cfg.level;
    let (layer, handle) = tglog_telegram::layer_from_config(cfg)?;
    tglog_core::logging::init_with("tglog", layer)?;

    let mut forwarded = 0u64;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        emit(level, &line);
        forwarded += 1;
        // One line in flight at a time, so a slow chat cannot overflow the queue.
        handle.flush().await;
    }

    let dropped = handle.dropped();
    handle.shutdown().await;
    if dropped > 0 {
        tracing::warn!(dropped, forwarded, "some stdin lines were not delivered");
        bail!("{dropped} of {forwarded} lines were dropped");
    }
    Ok(())
}

fn emit(level: Level, line: &str) {
    match level {
        Level::ERROR => tracing::error!(target: "stdin", "{line}"),
        Level::WARN => tracing::warn!(target: "stdin", "{line}"),
        Level::INFO => tracing::info!(target: "stdin", "{line}"),
        Level::DEBUG => tracing::debug!(target: "stdin", "{line}"),
        _ => tracing::trace!(target: "stdin", "{line}"),
    }
}
