//! Per-test setup and teardown.
//!
//! ```text
//! Idle ──begin──► Active ──end──► Idle
//!                 (capture / query / clear)
//! ```
//!
//! `end` evaluates the tolerance gate and then uninstalls the sink whatever
//! the verdict, so one test's records never leak into the next.
//!
//! While active, the sink is also registered with the [`GlobalRoute`], which
//! catches events from threads that carry no test dispatcher.

use tracing::dispatcher::DefaultGuard;
use tracing::{debug, Dispatch};
use tracing_subscriber::layer::SubscriberExt;

use crate::bridge::AsyncBridge;
use crate::capture_layer::{GlobalRoute, SinkLayer};
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::log_sink::{LogLevel, LogSink};
use crate::tolerance::ToleranceGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Active,
}

/// Owns the sink and tolerance gate for one test at a time.
#[derive(Debug, Clone)]
pub struct TestLifecycle {
    sink: LogSink,
    gate: ToleranceGate,
    default_ceiling: LogLevel,
    state: LifecycleState,
}

impl TestLifecycle {
    pub fn new(sink: LogSink, default_ceiling: LogLevel) -> Self {
        Self {
            sink,
            gate: ToleranceGate::new(default_ceiling),
            default_ceiling,
            state: LifecycleState::Idle,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        let sink = LogSink::new(config.match_options()).with_echo(config.echo_records);
        Self::new(sink, config.max_log_level)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn tolerance(&self) -> ToleranceGate {
        self.gate
    }

    /// Idle → Active. `None` selects the configured default ceiling.
    pub fn begin(&mut self, max_level: Option<LogLevel>) -> HarnessResult<()> {
        self.sink.install()?;
        GlobalRoute::get().register(&self.sink);
        self.gate.configure(max_level.unwrap_or(self.default_ceiling));
        self.state = LifecycleState::Active;
        debug!(ceiling = %self.gate.max_level(), "test capture started");
        Ok(())
    }

    pub fn set_log_tolerance(&mut self, max_level: LogLevel) {
        self.gate.configure(max_level);
    }

    /// Active → Idle. Returns the tolerance verdict, or the uninstall error
    /// when the verdict passed but the sink was not installed.
    pub fn end(&mut self) -> HarnessResult<()> {
        let verdict = self.gate.evaluate(&self.sink);
        let uninstalled = self.sink.uninstall();
        GlobalRoute::get().unregister(&self.sink);
        self.state = LifecycleState::Idle;
        debug!(passed = verdict.is_ok(), "test capture ended");
        verdict.and(uninstalled)
    }

    /// Layer feeding this lifecycle's sink.
    pub fn layer(&self) -> SinkLayer {
        SinkLayer::new(self.sink.clone())
    }

    /// Subscriber that captures every event into this lifecycle's sink.
    pub fn dispatch(&self) -> Dispatch {
        Dispatch::new(tracing_subscriber::registry().with(self.layer()))
    }
}

/// A running test: capture is installed on creation, routed from the
/// calling thread's tracing dispatcher and the process-wide route, and
/// enforced when the scope ends.
///
/// Dropping an unfinished scope panics on a tolerance violation, citing the
/// offending record and the full captured log, unless the thread is already
/// panicking.
pub struct TestScope {
    lifecycle: TestLifecycle,
    bridge: AsyncBridge,
    finished: bool,
    _dispatch: DefaultGuard,
}

impl TestScope {
    pub fn begin(config: &HarnessConfig) -> HarnessResult<Self> {
        Self::begin_with_tolerance(config, config.max_log_level)
    }

    pub fn begin_with_tolerance(config: &HarnessConfig, max_level: LogLevel) -> HarnessResult<Self> {
        let mut lifecycle = TestLifecycle::from_config(config);
        lifecycle.begin(Some(max_level))?;
        let guard = tracing::dispatcher::set_default(&lifecycle.dispatch());
        Ok(Self {
            lifecycle,
            bridge: AsyncBridge::from_config(config),
            finished: false,
            _dispatch: guard,
        })
    }

    pub fn sink(&self) -> &LogSink {
        self.lifecycle.sink()
    }

    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    pub fn set_log_tolerance(&mut self, max_level: LogLevel) {
        self.lifecycle.set_log_tolerance(max_level);
    }

    /// Ends the test explicitly and hands back the verdict.
    pub fn finish(mut self) -> HarnessResult<()> {
        self.finished = true;
        self.lifecycle.end()
    }

    fn failure_report(&self, error: &HarnessError, log: &str) -> String {
        format!("{error}\n\nCaptured log:\n{log}")
    }
}

impl Drop for TestScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let log = self.lifecycle.sink().dump();
        if let Err(error) = self.lifecycle.end() {
            if !std::thread::panicking() {
                panic!("{}", self.failure_report(&error, &log));
            }
        }
    }
}
