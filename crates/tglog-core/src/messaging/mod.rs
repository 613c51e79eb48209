//! Outbound messenger abstraction (Telegram today; test fakes in unit tests).

pub mod port;

#[cfg(test)]
pub(crate) mod fake;
