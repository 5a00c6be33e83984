//! Routes the client's `tracing` events into a [`LogSink`].
//!
//! Field mapping: `message` is the event text, `info` the informational
//! payload, `code` the symbolic error code and `correlation_id` a UUID.
//! Events the harness emits about itself (target `auth_harness::*`) are
//! skipped so they never count against a test's tolerance.
//!
//! Two routes feed sinks. A [`SinkLayer`] sits in a test's scoped dispatcher
//! and sees events from the test thread and from work scheduled on execution
//! contexts. The [`GlobalRoute`] is the process-wide default subscriber and
//! sees events from every other thread, such as threads the client starts
//! itself. A thread with a scoped dispatcher never reaches the global one,
//! so no event is captured twice.

use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;
use uuid::Uuid;

use crate::log_sink::{LogLevel, LogRecord, LogSink};

const HARNESS_TARGET: &str = "auth_harness";

/// Layer that captures events into a [`LogSink`].
#[derive(Debug, Clone)]
pub struct SinkLayer {
    sink: LogSink,
}

impl SinkLayer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    info: Option<String>,
    code: Option<String>,
    correlation_id: Option<String>,
    extra: Vec<String>,
}

impl RecordVisitor {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "info" => self.info = Some(value),
            "code" => self.code = Some(value),
            "correlation_id" => self.correlation_id = Some(value),
            name => self.extra.push(format!("{name}={value}")),
        }
    }

    fn into_record(self, level: LogLevel) -> LogRecord {
        let mut record = LogRecord::new(level, self.message.unwrap_or_default());
        // Unknown fields ride along in the info partition.
        record.info = match (self.info, self.extra.is_empty()) {
            (Some(info), true) => Some(info),
            (Some(info), false) => Some(format!("{info} {}", self.extra.join(" "))),
            (None, false) => Some(self.extra.join(" ")),
            (None, true) => None,
        };
        record.code = self.code;
        record.correlation_id = self
            .correlation_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok());
        record
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

fn is_harness_event(event: &Event<'_>) -> bool {
    event.metadata().target().starts_with(HARNESS_TARGET)
}

fn record_from(event: &Event<'_>) -> LogRecord {
    let mut visitor = RecordVisitor::default();
    event.record(&mut visitor);
    visitor.into_record(LogLevel::from(event.metadata().level()))
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if is_harness_event(event) {
            return;
        }
        self.sink.capture(record_from(event));
    }
}

static GLOBAL_ROUTE: OnceLock<GlobalRoute> = OnceLock::new();

/// Process-wide route for events raised outside any test's dispatcher.
///
/// Records go to the most recently registered sink that is still installed.
/// Tests running in parallel share this route, so a test that relies on it
/// should not overlap with another installed sink.
pub struct GlobalRoute {
    sinks: Mutex<Vec<LogSink>>,
}

impl fmt::Debug for GlobalRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalRoute")
            .field("sinks", &self.sinks().len())
            .finish()
    }
}

impl GlobalRoute {
    fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// The process route. The first call sets the global default subscriber.
    pub fn get() -> &'static GlobalRoute {
        GLOBAL_ROUTE.get_or_init(|| {
            let subscriber = tracing_subscriber::registry().with(RouteLayer);
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                warn!("global subscriber already set; events from unmanaged threads are not captured");
            }
            Self::new()
        })
    }

    pub fn register(&self, sink: &LogSink) {
        let mut sinks = self.sinks();
        sinks.retain(|s| !s.same_sink(sink));
        sinks.push(sink.clone());
    }

    pub fn unregister(&self, sink: &LogSink) {
        self.sinks().retain(|s| !s.same_sink(sink));
    }

    pub fn is_registered(&self, sink: &LogSink) -> bool {
        self.sinks().iter().any(|s| s.same_sink(sink))
    }

    /// Sink that currently receives routed records.
    pub fn current(&self) -> Option<LogSink> {
        self.sinks()
            .iter()
            .rev()
            .find(|s| s.is_installed())
            .cloned()
    }

    fn sinks(&self) -> MutexGuard<'_, Vec<LogSink>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Global default subscriber layer forwarding into [`GlobalRoute::current`].
struct RouteLayer;

impl<S> Layer<S> for RouteLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if is_harness_event(event) {
            return;
        }
        // Never initializes the route from inside an event.
        let Some(sink) = GLOBAL_ROUTE.get().and_then(GlobalRoute::current) else {
            return;
        };
        sink.capture(record_from(event));
    }
}
