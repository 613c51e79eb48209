use async_trait::async_trait;

use crate::{config::TELEGRAM_MESSAGE_LIMIT, domain::ChatTarget, Result};

/// Port the handler delivers formatted log text through.
///
/// The Telegram adapter implements it over the Bot API; anything else that
/// accepts Telegram-style HTML can sit behind the same interface.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Longest text the messenger accepts, in characters.
    fn max_message_len(&self) -> usize {
        TELEGRAM_MESSAGE_LIMIT
    }

    async fn send_html(&self, chat: &ChatTarget, html: &str) -> Result<()>;
}
