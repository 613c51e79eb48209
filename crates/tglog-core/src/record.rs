//! Log record model: what the layer captures from a `tracing` event and what
//! the handler turns into a Telegram message.

use std::{collections::BTreeMap, error::Error as StdError, fmt::Write as _};

use serde::Serialize;
use serde_json::Value;
use tracing::Level;

use crate::Result;

/// Span field names the layer maps onto [`RequestContext`].
///
/// ```ignore
/// let span = tracing::info_span!(
///     "request",
///     user_id = %user.id,
///     url = %req.uri(),
///     ip = %ip,
/// );
/// ```
pub mod fields {
    pub const USER_ID: &str = "user_id";
    pub const URL: &str = "url";
    pub const IP: &str = "ip";
    pub const REQUEST_QUERY: &str = "request_query";
    pub const REQUEST_BODY: &str = "request_body";

    pub(crate) fn is_request_field(name: &str) -> bool {
        matches!(name, USER_ID | URL | IP | REQUEST_QUERY | REQUEST_BODY)
    }
}

/// One captured log event.
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub target: String,
    pub location: Option<SourceLocation>,
    pub request: RequestContext,
    /// Event fields other than `message`.
    pub context: BTreeMap<String, Value>,
    /// Span fields that are not request fields.
    pub extra: BTreeMap<String, Value>,
    pub exception: Option<ExceptionTrace>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            target: String::new(),
            location: None,
            request: RequestContext::default(),
            context: BTreeMap::new(),
            extra: BTreeMap::new(),
            exception: None,
        }
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_exception(mut self, exception: ExceptionTrace) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Where the event was emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub module: Option<String>,
    pub line: Option<u32>,
}

impl SourceLocation {
    /// `file::module:line`, the caller summary shown in the `ctx` field.
    pub fn summary(&self) -> String {
        let module = self.module.as_deref().unwrap_or("{unknown}");
        match self.line {
            Some(line) => format!("{}::{module}:{line}", self.file),
            None => format!("{}::{module}", self.file),
        }
    }
}

/// Request the event belongs to, if any.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub url: Option<String>,
    pub ip: Option<String>,
    /// JSON text.
    pub query: Option<String>,
    /// JSON text.
    pub body: Option<String>,
}

impl RequestContext {
    pub fn with_user_id(mut self, user_id: impl ToString) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// JSON-encode the query parameters.
    pub fn with_query<T: Serialize + ?Sized>(mut self, query: &T) -> Result<Self> {
        self.query = Some(serde_json::to_string(query)?);
        Ok(self)
    }

    /// JSON-encode the request body.
    pub fn with_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    pub(crate) fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            fields::USER_ID => &mut self.user_id,
            fields::URL => &mut self.url,
            fields::IP => &mut self.ip,
            fields::REQUEST_QUERY => &mut self.query,
            fields::REQUEST_BODY => &mut self.body,
            _ => return,
        };
        *slot = Some(value);
    }
}

/// Resolve the client address from the usual proxy headers.
///
/// Precedence: `Client-IP`, then `X-Forwarded-For`, then the socket address.
/// Spaces are removed and only the first comma-separated entry is kept.
pub fn client_ip(
    client_ip: Option<&str>,
    forwarded_for: Option<&str>,
    remote_addr: Option<&str>,
) -> String {
    let raw = [client_ip, forwarded_for, remote_addr]
        .into_iter()
        .flatten()
        .find(|v| !v.trim().is_empty())
        .unwrap_or("");
    let compact: String = raw.chars().filter(|c| *c != ' ').collect();
    compact.split(',').next().unwrap_or("").to_string()
}

/// Same as [`client_ip`], reading the headers from a header map.
pub fn client_ip_from_headers(
    headers: &reqwest::header::HeaderMap,
    remote_addr: Option<std::net::SocketAddr>,
) -> String {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let remote = remote_addr.map(|a| a.ip().to_string());
    client_ip(
        header("client-ip"),
        header("x-forwarded-for"),
        remote.as_deref(),
    )
}

/// An error and its `source()` chain, outermost first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionTrace {
    pub message: String,
    pub chain: Vec<String>,
}

impl ExceptionTrace {
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let message = err.to_string();
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self { message, chain }
    }

    /// `#0 outer`, `#1 cause`, ... one per line.
    pub fn render(&self) -> String {
        let mut out = format!("#0 {}", self.message);
        for (idx, cause) in self.chain.iter().enumerate() {
            let _ = write!(out, "\n#{} {cause}", idx + 1);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("failed to load invoice")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn client_ip_prefers_client_header_then_forwarded() {
        assert_eq!(
            client_ip(Some("10.0.0.1"), Some("1.1.1.1"), Some("127.0.0.1")),
            "10.0.0.1"
        );
        assert_eq!(
            client_ip(None, Some(" 203.0.113.7, 10.0.0.2 "), Some("127.0.0.1")),
            "203.0.113.7"
        );
        assert_eq!(client_ip(Some(""), None, Some("127.0.0.1")), "127.0.0.1");
        assert_eq!(client_ip(None, None, None), "");
    }

    #[test]
    fn client_ip_reads_header_map() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.4,10.0.0.1".parse().unwrap());
        let remote = "127.0.0.1:9000".parse().ok();
        assert_eq!(client_ip_from_headers(&headers, remote), "198.51.100.4");
        assert_eq!(
            client_ip_from_headers(&reqwest::header::HeaderMap::new(), remote),
            "127.0.0.1"
        );
    }

    #[test]
    fn exception_trace_walks_sources() {
        let err = Wrapped(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "invoice.json missing",
        ));
        let trace = ExceptionTrace::from_error(&err);
        assert_eq!(
            trace.render(),
            "#0 failed to load invoice\n#1 invoice.json missing"
        );
    }

    #[test]
    fn request_context_encodes_query_as_json() {
        let mut query = BTreeMap::new();
        query.insert("page", "2");
        let ctx = RequestContext::default().with_query(&query).unwrap();
        assert_eq!(ctx.query.as_deref(), Some(r#"{"page":"2"}"#));
    }

    #[test]
    fn location_summary() {
        let loc = SourceLocation {
            file: "src/billing.rs".to_string(),
            module: Some("shop::billing".to_string()),
            line: Some(42),
        };
        assert_eq!(loc.summary(), "src/billing.rs::shop::billing:42");
    }
}
