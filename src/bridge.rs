//! Synchronous bridging of callback-driven work.
//!
//! [`AsyncBridge::run_and_wait`] schedules a body on a target context and
//! blocks the caller until the body's completion signal fires or the timeout
//! elapses. When the caller *is* the target context, blocking would starve the
//! very queue the callback needs, so the caller pumps the target's queue while
//! it waits instead. On any other thread a plain blocking wait is enough
//! because the target makes progress independently.
//!
//! A timeout is an outcome, not an error: the bridge reports it and leaves the
//! decision to fail the test to the caller.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::context::ExecutionContext;
use crate::errors::{HarnessError, HarnessResult};
use crate::signal::CompletionSignal;

/// Result slot shared between a bridged body and the waiting caller.
///
/// The first `complete` or `fail` wins and fires the signal; later calls
/// are ignored.
pub struct Completion<T> {
    signal: CompletionSignal,
    slot: Arc<Mutex<Option<anyhow::Result<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("signal", &self.signal)
            .finish()
    }
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            signal: CompletionSignal::new(),
            slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn complete(&self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail(&self, error: anyhow::Error) {
        self.settle(Err(error));
    }

    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    fn settle(&self, result: anyhow::Result<T>) {
        {
            let mut slot = self.slot();
            if slot.is_some() {
                return;
            }
            *slot = Some(result);
        }
        self.signal.fire();
    }

    fn take(&self) -> Option<anyhow::Result<T>> {
        self.slot().take()
    }

    fn slot(&self) -> MutexGuard<'_, Option<anyhow::Result<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a typed bridging call observed.
#[derive(Debug)]
pub enum BridgeOutcome<T> {
    Completed(T),
    /// The body returned an error or panicked before completing.
    Failed(anyhow::Error),
    TimedOut {
        context: String,
        waited: Duration,
    },
}

impl<T> BridgeOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, BridgeOutcome::Completed(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, BridgeOutcome::TimedOut { .. })
    }

    pub fn into_result(self) -> HarnessResult<T> {
        match self {
            BridgeOutcome::Completed(value) => Ok(value),
            BridgeOutcome::Failed(error) => Err(HarnessError::body(format!("{error:#}"))),
            BridgeOutcome::TimedOut { context, waited } => {
                Err(HarnessError::bridge_timeout(context, waited))
            }
        }
    }
}

/// Blocks a test on callback-driven work scheduled onto an execution context.
#[derive(Debug, Clone, Copy)]
pub struct AsyncBridge {
    default_timeout: Duration,
}

impl Default for AsyncBridge {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl AsyncBridge {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.default_timeout())
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Runs `body` on `target` and waits up to `timeout` for it to fire the
    /// signal it is handed. Returns whether the signal fired in time.
    ///
    /// The body owns error handling: anything it wants the caller to see must
    /// be stored somewhere the caller can inspect after this returns.
    pub fn run_and_wait<F>(&self, target: &ExecutionContext, body: F, timeout: Duration) -> bool
    where
        F: FnOnce(CompletionSignal) + Send + 'static,
    {
        let signal = CompletionSignal::new();
        let handed = signal.clone();
        self.drive(target, &signal, move || body(handed), timeout)
    }

    /// [`run_and_wait`](Self::run_and_wait) with the bridge's default timeout.
    pub fn run_and_wait_default<F>(&self, target: &ExecutionContext, body: F) -> bool
    where
        F: FnOnce(CompletionSignal) + Send + 'static,
    {
        self.run_and_wait(target, body, self.default_timeout)
    }

    /// Typed variant: the body settles a [`Completion`] with a value or an
    /// error. An `Err` returned by the body, or a panic inside it, settles the
    /// completion as failed on the target context instead of escaping there.
    pub fn call_and_wait<T, F>(
        &self,
        target: &ExecutionContext,
        body: F,
        timeout: Duration,
    ) -> BridgeOutcome<T>
    where
        T: Send + 'static,
        F: FnOnce(Completion<T>) -> anyhow::Result<()> + Send + 'static,
    {
        let completion = Completion::new();
        let handed = completion.clone();
        let started = Instant::now();

        let job = move || {
            let guard = handed.clone();
            match catch_unwind(AssertUnwindSafe(move || body(handed))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => guard.fail(error),
                Err(payload) => guard.fail(anyhow::anyhow!(
                    "body panicked: {}",
                    panic_message(payload.as_ref())
                )),
            }
        };

        let signal = completion.signal().clone();
        if !self.drive(target, &signal, job, timeout) {
            return BridgeOutcome::TimedOut {
                context: target.name().to_string(),
                waited: started.elapsed(),
            };
        }

        match completion.take() {
            Some(Ok(value)) => BridgeOutcome::Completed(value),
            Some(Err(error)) => BridgeOutcome::Failed(error),
            None => BridgeOutcome::Failed(anyhow::anyhow!("completion fired without a result")),
        }
    }

    fn drive(
        &self,
        target: &ExecutionContext,
        signal: &CompletionSignal,
        job: impl FnOnce() + Send + 'static,
        timeout: Duration,
    ) -> bool {
        let started = Instant::now();
        let same_context = target.is_current();

        if same_context {
            signal.on_fire(target.waker());
        }

        if let Err(error) = target.schedule(job) {
            warn!(context = target.name(), %error, "bridge could not schedule body");
            return false;
        }

        let fired = if same_context {
            target.pump_until(timeout, || signal.is_fired())
        } else {
            signal.wait(timeout)
        };

        if fired {
            debug!(
                context = target.name(),
                same_context,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "bridged body completed"
            );
        } else {
            warn!(
                context = target.name(),
                same_context,
                timeout_ms = timeout.as_millis() as u64,
                "bridged body did not complete before timeout"
            );
        }
        fired
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
