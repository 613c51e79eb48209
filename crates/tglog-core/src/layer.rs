//! `tracing` integration: a layer that captures events into [`LogRecord`]s
//! and a background worker that hands them to the handler.

use std::{
    collections::BTreeMap,
    error::Error as StdError,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    field::{Field, Visit},
    span::{Attributes, Id, Record},
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use crate::{
    handler::TelegramLoggerHandler,
    record::{fields, ExceptionTrace, LogRecord, SourceLocation},
};

/// Targets whose events are never forwarded: sending them would log the
/// delivery of the delivery.
const DELIVERY_TARGETS: &[&str] = &["tglog", "teloxide", "reqwest", "hyper", "h2", "rustls"];

fn is_delivery_target(target: &str) -> bool {
    DELIVERY_TARGETS.iter().any(|prefix| {
        target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::") || rest.starts_with('_'))
    })
}

enum Command {
    Record(Box<LogRecord>),
    Flush(oneshot::Sender<()>),
}

/// Layer that forwards events at or above the configured level to Telegram.
///
/// `on_event` never blocks: records go into a bounded queue and are dropped
/// when it is full.
pub struct TelegramLayer {
    threshold: Level,
    active: bool,
    tx: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
}

/// Control handle for the delivery worker started by [`TelegramLayer::spawn`].
pub struct LayerHandle {
    tx: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl TelegramLayer {
    /// Build the layer and start its delivery worker on the current tokio runtime.
    ///
    /// The queue holds `queue_capacity` records from the handler's config.
    pub fn spawn(handler: TelegramLoggerHandler) -> (Self, LayerHandle) {
        let cfg = handler.config();
        let threshold = cfg.level;
        let active = cfg.is_deliverable();
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));

        let join = tokio::spawn(run_worker(Arc::new(handler), rx, cancel.clone()));

        let layer = Self {
            threshold,
            active,
            tx: tx.clone(),
            dropped: dropped.clone(),
        };
        let handle = LayerHandle {
            tx,
            dropped,
            cancel,
            join,
        };
        (layer, handle)
    }

    fn capture<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> LogRecord
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let meta = event.metadata();
        let mut record = LogRecord::new(*meta.level(), String::new());
        record.target = meta.target().to_string();
        record.location = meta.file().map(|file| SourceLocation {
            file: file.to_string(),
            module: meta.module_path().map(str::to_string),
            line: meta.line(),
        });

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let ext = span.extensions();
                let Some(span_fields) = ext.get::<SpanFields>() else {
                    continue;
                };
                for (name, value) in &span_fields.0 {
                    if fields::is_request_field(name) {
                        record.request.set(name, value_text(value));
                    } else {
                        record.extra.insert(name.clone(), value.clone());
                    }
                }
            }
        }

        let mut visitor = FieldVisitor::for_event();
        event.record(&mut visitor);
        record.message = visitor.message.unwrap_or_default();
        record.context = visitor.fields;
        record.exception = visitor.exception;
        record
    }
}

impl<S> Layer<S> for TelegramLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::for_span();
        attrs.record(&mut visitor);

        let mut ext = span.extensions_mut();
        match ext.get_mut::<SpanFields>() {
            Some(existing) => existing.0.extend(visitor.fields),
            None => ext.insert(SpanFields(visitor.fields)),
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::for_span();
        values.record(&mut visitor);

        let mut ext = span.extensions_mut();
        match ext.get_mut::<SpanFields>() {
            Some(existing) => existing.0.extend(visitor.fields),
            None => ext.insert(SpanFields(visitor.fields)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if !self.active {
            return;
        }
        let meta = event.metadata();
        if *meta.level() > self.threshold || is_delivery_target(meta.target()) {
            return;
        }

        let record = self.capture(event, &ctx);
        // Full or closed queue: drop. Logging must not stall the caller.
        if self.tx.try_send(Command::Record(Box::new(record))).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl LayerHandle {
    /// Wait until every record queued before this call has been handled.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Records dropped so far because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain the queue, then stop the worker.
    pub async fn shutdown(self) {
        self.flush().await;
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

async fn run_worker(
    handler: Arc<TelegramLoggerHandler>,
    mut rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(Command::Record(record)) => {
                    let outcome = handler.write(&record).await;
                    tracing::trace!(?outcome, "telegram log record handled");
                }
                Some(Command::Flush(ack)) => {
                    let _ = ack.send(());
                }
                None => break,
            },
        }
    }
}

/// Fields recorded on a span, kept in the span's extensions.
struct SpanFields(BTreeMap<String, Value>);

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct FieldVisitor {
    capture_message: bool,
    message: Option<String>,
    fields: BTreeMap<String, Value>,
    exception: Option<ExceptionTrace>,
}

impl FieldVisitor {
    fn for_event() -> Self {
        Self {
            capture_message: true,
            message: None,
            fields: BTreeMap::new(),
            exception: None,
        }
    }

    fn for_span() -> Self {
        Self {
            capture_message: false,
            ..Self::for_event()
        }
    }

    fn put(&mut self, field: &Field, value: Value) {
        if self.capture_message && field.name() == "message" {
            self.message = Some(value_text(&value));
            return;
        }
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn StdError + 'static)) {
        if self.capture_message && self.exception.is_none() {
            self.exception = Some(ExceptionTrace::from_error(value));
        }
        self.put(field, Value::String(value.to_string()));
    }
}
