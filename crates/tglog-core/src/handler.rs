use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;
use tracing::Level;

use crate::{
    config::TelegramLoggerConfig,
    domain::ChatTarget,
    filter::IgnoreRules,
    formatting::{format_log_text, FieldValue, Label, LogData},
    messaging::port::MessagingPort,
    record::LogRecord,
};

const MISSING: &str = "-";

/// Outcome of one [`TelegramLoggerHandler::write`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped(SkipReason),
    /// The messenger returned an error. It has been logged and dropped.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No bot token or chat id configured.
    NotConfigured,
    BelowThreshold,
    /// Matched an ignored message prefix or context substring.
    Ignored,
}

/// Formats log records and delivers them to the configured chat.
///
/// Delivery never fails from the caller's point of view: every error is
/// absorbed and reported as [`Delivery::Failed`].
pub struct TelegramLoggerHandler {
    config: TelegramLoggerConfig,
    rules: IgnoreRules,
    messenger: Arc<dyn MessagingPort>,
}

impl TelegramLoggerHandler {
    pub fn new(config: TelegramLoggerConfig, messenger: Arc<dyn MessagingPort>) -> Self {
        let rules = IgnoreRules::from_config(&config);
        Self {
            config,
            rules,
            messenger,
        }
    }

    pub fn config(&self) -> &TelegramLoggerConfig {
        &self.config
    }

    /// Whether records at `level` pass the threshold.
    pub fn is_handling(&self, level: Level) -> bool {
        // `tracing` orders more verbose levels as greater.
        level <= self.config.level
    }

    fn chat(&self) -> Option<&ChatTarget> {
        if self.config.bot_token.is_empty() {
            return None;
        }
        self.config.chat_id.as_ref()
    }

    fn limit(&self) -> usize {
        self.config.message_limit.min(self.messenger.max_message_len())
    }

    pub async fn write(&self, record: &LogRecord) -> Delivery {
        let Some(chat) = self.chat() else {
            return Delivery::Skipped(SkipReason::NotConfigured);
        };
        if !self.is_handling(record.level) {
            return Delivery::Skipped(SkipReason::BelowThreshold);
        }
        let Some(text) = self.format(record) else {
            return Delivery::Skipped(SkipReason::Ignored);
        };

        match self.messenger.send_html(chat, &text).await {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                tracing::debug!(error = %e, chat = %chat, "telegram log delivery failed");
                Delivery::Failed
            }
        }
    }

    /// Build, filter and render a record. `None` when an ignore rule matches.
    pub fn format(&self, record: &LogRecord) -> Option<String> {
        let context = json_object(&record.context);
        if self.rules.ignores(&record.message, context.as_deref()) {
            return None;
        }
        let data = self.build_log_data(record);
        Some(format_log_text(&data, self.limit()))
    }

    pub fn build_log_data(&self, record: &LogRecord) -> LogData {
        let mut data = LogData::new();
        let req = &record.request;
        let or_missing = |v: &Option<String>| v.clone().unwrap_or_else(|| MISSING.to_string());

        data.insert(
            Label::Application,
            FieldValue::plain(self.config.application_name.clone()),
        );
        data.insert(Label::LogLevel, FieldValue::plain(record.level.as_str()));
        data.insert(Label::UserId, FieldValue::plain(or_missing(&req.user_id)));
        data.insert(Label::Url, FieldValue::plain(or_missing(&req.url)));

        if self.config.log_request_data {
            data.insert(Label::RequestQuery, FieldValue::plain(or_missing(&req.query)));
            data.insert(Label::RequestBody, FieldValue::plain(or_missing(&req.body)));
        }

        data.insert(Label::Ip, FieldValue::plain(or_missing(&req.ip)));
        data.insert(
            Label::Ctx,
            FieldValue::plain(
                record
                    .location
                    .as_ref()
                    .map(|l| l.summary())
                    .unwrap_or_default(),
            ),
        );
        data.insert(Label::Message, FieldValue::pre(record.message.clone()));

        if let Some(extra) = json_object(&record.extra) {
            data.insert(Label::Extra, FieldValue::code(extra));
        }

        if self.config.log_trace_exception {
            if let Some(exception) = &record.exception {
                data.insert(Label::TraceException, FieldValue::plain(exception.render()));
            }
        }

        if let Some(context) = json_object(&record.context) {
            data.insert(Label::Context, FieldValue::code(context));
        }

        data
    }
}

fn json_object(map: &BTreeMap<String, Value>) -> Option<String> {
    if map.is_empty() {
        return None;
    }
    serde_json::to_string(map).ok()
}
