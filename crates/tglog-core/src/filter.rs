use crate::config::TelegramLoggerConfig;

/// Drop rules applied before a record is sent.
#[derive(Clone, Debug, Default)]
pub struct IgnoreRules {
    message_prefixes: Vec<String>,
    context_substrings: Vec<String>,
}

impl IgnoreRules {
    /// Empty entries are discarded: an empty prefix would match every message.
    pub fn new(
        message_prefixes: impl IntoIterator<Item = String>,
        context_substrings: impl IntoIterator<Item = String>,
    ) -> Self {
        let clean = |items: Vec<String>| {
            items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            message_prefixes: clean(message_prefixes.into_iter().collect()),
            context_substrings: clean(context_substrings.into_iter().collect()),
        }
    }

    pub fn from_config(cfg: &TelegramLoggerConfig) -> Self {
        Self::new(cfg.ignore_messages.clone(), cfg.ignore_context.clone())
    }

    pub fn ignores_message(&self, message: &str) -> bool {
        !message.is_empty()
            && self
                .message_prefixes
                .iter()
                .any(|p| message.starts_with(p.as_str()))
    }

    pub fn ignores_context(&self, context: &str) -> bool {
        !context.is_empty()
            && self
                .context_substrings
                .iter()
                .any(|s| context.contains(s.as_str()))
    }

    pub fn ignores(&self, message: &str, context: Option<&str>) -> bool {
        self.ignores_message(message) || context.is_some_and(|c| self.ignores_context(c))
    }

    pub fn is_empty(&self) -> bool {
        self.message_prefixes.is_empty() && self.context_substrings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(messages: &[&str], context: &[&str]) -> IgnoreRules {
        IgnoreRules::new(
            messages.iter().map(|s| s.to_string()),
            context.iter().map(|s| s.to_string()),
        )
    }

    #[test]
    fn message_prefix_matches_only_at_start() {
        let r = rules(&["Unauthenticated"], &[]);
        assert!(r.ignores_message("Unauthenticated."));
        assert!(!r.ignores_message("User is Unauthenticated"));
        assert!(!r.ignores_message(""));
    }

    #[test]
    fn context_matches_anywhere() {
        let r = rules(&[], &["\"path\":\"/health\""]);
        assert!(r.ignores_context(r#"{"status":500,"path":"/health"}"#));
        assert!(!r.ignores_context(r#"{"path":"/orders"}"#));
        assert!(!r.ignores("boom", None));
        assert!(r.ignores("boom", Some(r#"{"path":"/health"}"#)));
    }

    #[test]
    fn blank_entries_do_not_match_everything() {
        let r = rules(&["", "  "], &[""]);
        assert!(r.is_empty());
        assert!(!r.ignores("anything", Some("{}")));
    }
}
