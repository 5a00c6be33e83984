//! One-shot completion signal.
//!
//! Once fired a signal stays fired. The flag is checked and waited on under
//! the same lock, so a `fire` that lands before `wait` is entered, or while
//! the waiter is between its check and its sleep, is never lost.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type FireHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SignalState {
    fired: bool,
    hooks: Vec<FireHook>,
}

#[derive(Default)]
struct SignalInner {
    state: Mutex<SignalState>,
    fired: Condvar,
}

/// Thread-safe gate meaning "the awaited callback has executed".
#[derive(Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<SignalInner>,
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal fired and wakes the waiter. Safe from any thread;
    /// repeated calls are no-ops.
    pub fn fire(&self) {
        let hooks = {
            let mut state = self.lock();
            if state.fired {
                return;
            }
            state.fired = true;
            std::mem::take(&mut state.hooks)
        };
        self.inner.fired.notify_all();
        for hook in hooks {
            hook();
        }
    }

    pub fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Blocks until fired or `timeout` elapses. Returns whether it fired.
    pub fn wait(&self, timeout: Duration) -> bool {
        let state = self.lock();
        if Instant::now().checked_add(timeout).is_none() {
            let state = self
                .inner
                .fired
                .wait_while(state, |s| !s.fired)
                .unwrap_or_else(PoisonError::into_inner);
            return state.fired;
        }
        let (state, _) = self
            .inner
            .fired
            .wait_timeout_while(state, timeout, |s| !s.fired)
            .unwrap_or_else(PoisonError::into_inner);
        state.fired
    }

    /// Like [`wait`](Self::wait) but parks on tokio's blocking pool instead
    /// of the calling task's worker thread.
    pub async fn wait_async(&self, timeout: Duration) -> bool {
        let signal = self.clone();
        tokio::task::spawn_blocking(move || signal.wait(timeout))
            .await
            .unwrap_or(false)
    }

    /// Runs `hook` once the signal fires, immediately if it already has.
    /// The hook runs on the firing thread and must not block.
    pub fn on_fire(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.lock();
            if !state.fired {
                state.hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
