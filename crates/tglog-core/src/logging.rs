use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{errors::Error, layer::TelegramLayer, Result};

fn console_filter(service_name: &str) -> EnvFilter {
    // Default: info for our crates and the service. Can be overridden with `RUST_LOG`.
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "info,tglog=info,tglog_core=info,tglog_telegram=info,{service_name}=info"
        ))
    })
}

/// Initialize console logging only.
pub fn init(service_name: &str) -> Result<()> {
    fmt()
        .with_env_filter(console_filter(service_name))
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::Config(format!("logging init failed: {e}")))
}

/// Initialize console logging plus Telegram forwarding.
///
/// `RUST_LOG` only filters the console. The Telegram layer applies its own
/// level threshold so a quiet console does not hide errors from the chat.
pub fn init_with(service_name: &str, telegram: TelegramLayer) -> Result<()> {
    let console = fmt::layer()
        .with_target(false)
        .with_ansi(true)
        .with_filter(console_filter(service_name));

    tracing_subscriber::registry()
        .with(console)
        .with(telegram)
        .try_init()
        .map_err(|e| Error::Config(format!("logging init failed: {e}")))
}
