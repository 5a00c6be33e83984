//! Library root for the `auth_harness` crate
//!
//! Test support for an authentication client whose APIs complete through
//! callbacks on named execution contexts and whose runtime emits a leveled
//! log stream.

// Core error handling
pub mod errors;

// Log capture
pub mod capture_layer;
pub mod log_sink;
pub mod occurrence;
pub mod tolerance;

// Completion bridging
pub mod bridge;
pub mod context;
pub mod signal;

// Per-test lifecycle
pub mod lifecycle;

// Configuration
pub mod config;

// Test helpers
#[macro_use]
pub mod assertions;
pub mod fixtures;

pub use bridge::{AsyncBridge, BridgeOutcome, Completion};
pub use capture_layer::{GlobalRoute, SinkLayer};
pub use config::{load_config, HarnessConfig};
pub use context::{ContextId, ExecutionContext};
pub use errors::{HarnessError, HarnessResult};
pub use lifecycle::{LifecycleState, TestLifecycle, TestScope};
pub use log_sink::{LogLevel, LogPartition, LogRecord, LogSink};
pub use occurrence::MatchOptions;
pub use signal::CompletionSignal;
pub use tolerance::ToleranceGate;
