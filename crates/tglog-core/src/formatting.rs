//! Telegram HTML rendering of log data.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn escape_char(c: char) -> std::borrow::Cow<'static, str> {
    match c {
        '&' => "&amp;".into(),
        '<' => "&lt;".into(),
        '>' => "&gt;".into(),
        '"' => "&quot;".into(),
        other => other.to_string().into(),
    }
}

/// First `max` chars of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Labels of a log message, in output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Label {
    Application,
    LogLevel,
    UserId,
    Url,
    RequestQuery,
    RequestBody,
    Ip,
    Ctx,
    Message,
    Extra,
    Context,
    TraceException,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Application => "Application",
            Self::LogLevel => "Log Level",
            Self::UserId => "User id",
            Self::Url => "URL",
            Self::RequestQuery => "Request query",
            Self::RequestBody => "Request body",
            Self::Ip => "IP",
            Self::Ctx => "ctx",
            Self::Message => "Message",
            Self::Extra => "Extra",
            Self::Context => "Context",
            Self::TraceException => "Trace exception",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Markup {
    Plain,
    Pre,
    Code,
}

impl Markup {
    fn tags(self) -> (&'static str, &'static str) {
        match self {
            Self::Plain => ("", ""),
            Self::Pre => ("<pre>", "</pre>"),
            Self::Code => ("<code>", "</code>"),
        }
    }
}

/// Raw field text plus the tag it is wrapped in once rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldValue {
    pub raw: String,
    pub markup: Markup,
}

impl FieldValue {
    pub fn plain(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            markup: Markup::Plain,
        }
    }

    pub fn pre(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            markup: Markup::Pre,
        }
    }

    pub fn code(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            markup: Markup::Code,
        }
    }

    pub fn render(&self) -> String {
        let (open, close) = self.markup.tags();
        format!("{open}{}{close}", escape_html(&self.raw))
    }

    /// Render with the raw text cut down until the result fits in `budget` chars.
    fn render_within(&self, budget: usize) -> Option<String> {
        let (open, close) = self.markup.tags();
        let overhead = char_len(open) + char_len(close);
        if overhead > budget {
            return None;
        }
        let mut room = budget - overhead;
        let mut body = String::new();
        for c in self.raw.chars() {
            let piece = escape_char(c);
            let n = char_len(&piece);
            if n > room {
                break;
            }
            room -= n;
            body.push_str(&piece);
        }
        Some(format!("{open}{body}{close}"))
    }
}

/// Ordered label → value mapping built for one record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogData {
    entries: Vec<(Label, FieldValue)>,
}

impl LogData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. New labels keep insertion order.
    pub fn insert(&mut self, label: Label, value: FieldValue) {
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: Label) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, v)| v)
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.entries.iter().map(|(l, _)| *l)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, &FieldValue)> {
        self.entries.iter().map(|(l, v)| (*l, v))
    }
}

const ELLIPSIS: char = '…';

fn field_prefix(label: Label) -> String {
    format!("<b>{}</b>: ", label.as_str())
}

fn render_lines(fields: &[(Label, FieldValue)]) -> String {
    let mut out = String::new();
    for (label, value) in fields {
        out.push_str(&field_prefix(*label));
        out.push_str(&value.render());
        out.push('\n');
    }
    out
}

/// Render log data as Telegram HTML, at most `limit` characters.
///
/// Every field but the exception trace becomes one `<b>Label</b>: value` line.
/// The trace goes last and only gets whatever room the other lines leave.
pub fn format_log_text(data: &LogData, limit: usize) -> String {
    let mut fields: Vec<(Label, FieldValue)> = data
        .iter()
        .filter(|(label, _)| *label != Label::TraceException)
        .map(|(label, value)| (label, value.clone()))
        .collect();

    let mut text = render_lines(&fields);
    while char_len(&text) > limit {
        let overflow = char_len(&text) - limit;
        let Some((_, longest)) = fields
            .iter_mut()
            .max_by_key(|(_, value)| char_len(&value.raw))
        else {
            break;
        };
        let current = char_len(&longest.raw);
        if current == 0 {
            break;
        }
        let keep = current.saturating_sub(overflow + 1);
        longest.raw = if keep == 0 {
            String::new()
        } else {
            let mut cut = truncate_chars(&longest.raw, keep).to_string();
            cut.push(ELLIPSIS);
            cut
        };
        text = render_lines(&fields);
    }

    if char_len(&text) > limit {
        // Labels alone do not fit. Keep whole lines so no tag is left open.
        let mut kept = String::new();
        for line in text.split_inclusive('\n') {
            if char_len(&kept) + char_len(line) > limit {
                break;
            }
            kept.push_str(line);
        }
        return kept;
    }

    if let Some(trace) = data.get(Label::TraceException) {
        let prefix = field_prefix(Label::TraceException);
        let used = char_len(&text) + char_len(&prefix) + 1;
        if used < limit {
            if let Some(rendered) = trace.render_within(limit - used) {
                text.push_str(&prefix);
                text.push_str(&rendered);
                text.push('\n');
            }
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("日本語", 0), "");
    }

    #[test]
    fn renders_fields_in_order_with_markup() {
        let mut data = LogData::new();
        data.insert(Label::Application, FieldValue::plain("shop"));
        data.insert(Label::Message, FieldValue::pre("x < y"));
        data.insert(Label::Context, FieldValue::code(r#"{"a":1}"#));

        assert_eq!(
            format_log_text(&data, 4096),
            "<b>Application</b>: shop\n\
             <b>Message</b>: <pre>x &lt; y</pre>\n\
             <b>Context</b>: <code>{&quot;a&quot;:1}</code>\n"
        );
    }

    #[test]
    fn trace_is_rendered_last_even_if_inserted_earlier() {
        let mut data = LogData::new();
        data.insert(Label::Message, FieldValue::pre("boom"));
        data.insert(Label::TraceException, FieldValue::plain("#0 boom"));
        data.insert(Label::Context, FieldValue::code("{}"));

        let text = format_log_text(&data, 4096);
        assert!(text.ends_with("<b>Trace exception</b>: #0 boom\n"));
        assert!(text.find("Context").unwrap() < text.find("Trace exception").unwrap());
    }

    #[test]
    fn long_trace_is_cut_to_fit_the_limit() {
        let mut data = LogData::new();
        data.insert(Label::Message, FieldValue::pre("boom"));
        data.insert(Label::TraceException, FieldValue::plain("x".repeat(10_000)));

        let text = format_log_text(&data, 4096);
        assert_eq!(text.chars().count(), 4096);
        assert!(text.contains("<b>Trace exception</b>: xxx"));
        assert!(text.ends_with("x\n"));
    }

    #[test]
    fn trace_budget_accounts_for_escaping() {
        let mut data = LogData::new();
        data.insert(Label::TraceException, FieldValue::plain("<".repeat(5_000)));

        let text = format_log_text(&data, 200);
        assert!(text.chars().count() <= 200);
        assert!(text.starts_with("<b>Trace exception</b>: &lt;&lt;"));
        assert!(text.ends_with("&lt;\n"));
    }

    #[test]
    fn oversized_fields_are_shortened_before_trace() {
        let mut data = LogData::new();
        data.insert(Label::Application, FieldValue::plain("shop"));
        data.insert(Label::Message, FieldValue::pre("m".repeat(6_000)));
        data.insert(Label::TraceException, FieldValue::plain("#0 boom"));

        let text = format_log_text(&data, 4096);
        assert!(text.chars().count() <= 4096);
        assert!(text.contains("<b>Application</b>: shop\n"));
        assert!(text.contains("m…</pre>"));
        assert!(!text.contains("Trace exception"));
    }

    #[test]
    fn tiny_limit_drops_whole_lines() {
        let mut data = LogData::new();
        for label in [
            Label::Application,
            Label::LogLevel,
            Label::UserId,
            Label::Url,
            Label::Ip,
            Label::Ctx,
        ] {
            data.insert(label, FieldValue::plain(""));
        }
        data.insert(Label::Message, FieldValue::pre("boom"));
        data.insert(Label::TraceException, FieldValue::plain("#0 boom"));

        let text = format_log_text(&data, 64);
        assert_eq!(
            text,
            "<b>Application</b>: \n<b>Log Level</b>: \n<b>User id</b>: \n"
        );
        assert_eq!(text.matches("<b>").count(), text.matches("</b>").count());

        assert_eq!(format_log_text(&data, 10), "");
    }

    #[test]
    fn insert_replaces_existing_label_in_place() {
        let mut data = LogData::new();
        data.insert(Label::Application, FieldValue::plain("a"));
        data.insert(Label::Message, FieldValue::pre("m"));
        data.insert(Label::Application, FieldValue::plain("b"));

        assert_eq!(
            data.labels().collect::<Vec<_>>(),
            vec![Label::Application, Label::Message]
        );
        assert_eq!(data.get(Label::Application).unwrap().raw, "b");
    }
}
