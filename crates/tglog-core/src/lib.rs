//! Core of the Telegram logger: record model, filters, formatting, the
//! delivery handler and the `tracing` layer.
//!
//! The crate is messenger-agnostic. The Bot API client lives behind
//! [`messaging::port::MessagingPort`], implemented in `tglog-telegram`.

pub mod config;
pub mod domain;
pub mod errors;
pub mod filter;
pub mod formatting;
pub mod handler;
pub mod layer;
pub mod logging;
pub mod messaging;
pub mod record;

pub use errors::{Error, Result};
pub use handler::{Delivery, SkipReason, TelegramLoggerHandler};
pub use layer::{LayerHandle, TelegramLayer};
