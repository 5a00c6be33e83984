//! Named execution contexts.
//!
//! A context is a queue of work bound to exactly one thread. Background
//! contexts own a worker thread that drains the queue; an attached context
//! is bound to the thread that attached it (the "main" context of a test),
//! and its queue only advances while that thread pumps it.
//!
//! Work is run under the tracing dispatcher that was current when it was
//! scheduled, so records emitted on any context reach the scheduling test's
//! sink.
//!
//! The worker thread only holds the queue, never a handle. Dropping the last
//! handle closes the queue and joins the worker once it has drained.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::errors::{HarnessError, HarnessResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Identity of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Context bound to the calling thread, if any.
    pub fn current() -> Option<Self> {
        CURRENT_CONTEXT.with(Cell::get)
    }
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    woken: bool,
    closed: bool,
}

/// Queue state shared by the handles and the worker thread.
struct Shared {
    id: ContextId,
    name: String,
    queue: Mutex<QueueState>,
    ready: Condvar,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, QueueState> {
        lock_or_recover(&self.queue)
    }

    fn is_current(&self) -> bool {
        ContextId::current() == Some(self.id)
    }

    fn close(&self) {
        self.queue().closed = true;
        self.ready.notify_all();
    }

    fn wake(&self) {
        self.queue().woken = true;
        self.ready.notify_all();
    }

    fn run_worker(&self) {
        CURRENT_CONTEXT.with(|current| current.set(Some(self.id)));
        debug!(context = %self.name, "context worker started");
        loop {
            let job = {
                let mut queue = self.queue();
                while queue.jobs.is_empty() && !queue.closed {
                    queue = self
                        .ready
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                match queue.jobs.pop_front() {
                    Some(job) => job,
                    None => break,
                }
            };
            self.run_job(job);
        }
        debug!(context = %self.name, "context worker stopped");
    }

    fn run_job(&self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!(context = %self.name, "scheduled work panicked");
        }
    }
}

/// Owner of the worker thread, shared by every handle.
struct ContextInner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ContextInner {
    fn stop(&self) {
        self.shared.close();
        let handle = lock_or_recover(&self.worker).take();
        let Some(handle) = handle else {
            return;
        };
        // A worker dropping or shutting down its own context just lets the
        // loop end once the queue drains.
        if self.shared.is_current() {
            return;
        }
        if handle.join().is_err() {
            warn!(context = %self.shared.name, "context worker exited abnormally");
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to a named execution context. Clones refer to the same context.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("pending", &self.pending())
            .finish()
    }
}

impl ExecutionContext {
    fn with_name(name: &str) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                shared: Arc::new(Shared {
                    id: ContextId::next(),
                    name: name.to_string(),
                    queue: Mutex::new(QueueState::default()),
                    ready: Condvar::new(),
                }),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Binds a new context to the calling thread.
    ///
    /// A thread is bound to at most one context; attaching again rebinds it.
    pub fn attach_current(name: &str) -> Self {
        let context = Self::with_name(name);
        CURRENT_CONTEXT.with(|current| current.set(Some(context.id())));
        debug!(context = name, "attached execution context to current thread");
        context
    }

    /// Starts a context with its own worker thread.
    pub fn spawn(name: &str) -> HarnessResult<Self> {
        let context = Self::with_name(name);
        let shared = Arc::clone(&context.inner.shared);
        let handle = thread::Builder::new()
            .name(format!("ctx-{name}"))
            .spawn(move || shared.run_worker())
            .map_err(|source| HarnessError::Spawn {
                context: name.to_string(),
                source,
            })?;
        *lock_or_recover(&context.inner.worker) = Some(handle);
        Ok(context)
    }

    pub fn id(&self) -> ContextId {
        self.shared().id
    }

    pub fn name(&self) -> &str {
        &self.shared().name
    }

    /// Whether the calling thread is this context's thread.
    pub fn is_current(&self) -> bool {
        self.shared().is_current()
    }

    pub fn is_closed(&self) -> bool {
        self.queue().closed
    }

    pub fn pending(&self) -> usize {
        self.queue().jobs.len()
    }

    /// Queues `work` to run on this context.
    pub fn schedule(&self, work: impl FnOnce() + Send + 'static) -> HarnessResult<()> {
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let job: Job = Box::new(move || tracing::dispatcher::with_default(&dispatch, work));

        let mut queue = self.queue();
        if queue.closed {
            return Err(HarnessError::context_closed(self.name()));
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared().ready.notify_all();
        Ok(())
    }

    /// Interrupts a pump blocked waiting for work.
    pub fn wake(&self) {
        self.shared().wake();
    }

    /// A wake callback that does not keep the context alive.
    pub(crate) fn waker(&self) -> impl FnOnce() + Send + 'static {
        let shared: Weak<Shared> = Arc::downgrade(&self.inner.shared);
        move || {
            if let Some(shared) = shared.upgrade() {
                shared.wake();
            }
        }
    }

    /// Runs every queued job, including jobs queued by the jobs themselves.
    /// Only the context's own thread may pump; elsewhere this does nothing.
    pub fn run_pending(&self) -> usize {
        if !self.is_current() {
            return 0;
        }
        let mut ran = 0;
        loop {
            let next = self.queue().jobs.pop_front();
            let Some(job) = next else {
                return ran;
            };
            self.shared().run_job(job);
            ran += 1;
        }
    }

    /// Pumps the queue until `done` holds or `timeout` elapses.
    ///
    /// Sleeps while the queue is empty; `schedule` and `wake` both end the
    /// sleep. A timeout too large to represent as an instant never expires.
    /// Returns the final value of `done`.
    pub fn pump_until(&self, timeout: Duration, done: impl Fn() -> bool) -> bool {
        if !self.is_current() {
            return done();
        }
        let deadline = Instant::now().checked_add(timeout);
        let ready = &self.shared().ready;
        loop {
            self.run_pending();
            if done() {
                return true;
            }

            let mut queue = self.queue();
            while queue.jobs.is_empty() && !queue.woken {
                queue = match deadline {
                    None => ready.wait(queue).unwrap_or_else(PoisonError::into_inner),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            drop(queue);
                            return done();
                        }
                        ready
                            .wait_timeout(queue, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                };
            }
            queue.woken = false;
        }
    }

    /// Stops accepting work. A worker thread finishes its queue and exits.
    pub fn shutdown(&self) {
        self.inner.stop();
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    fn queue(&self) -> MutexGuard<'_, QueueState> {
        self.shared().queue()
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
