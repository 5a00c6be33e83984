//! Error taxonomy for the test harness
//!
//! Every error here is resolved at the test boundary. Nothing is retried;
//! a failed teardown or a misused sink fails the current test and the suite
//! moves on to the next one.

use crate::log_sink::LogLevel;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Log sink already installed for this test")]
    AlreadyInstalled,

    #[error("Log sink is not installed")]
    NotInstalled,

    #[error("Log tolerance exceeded: {level} record above {max} ceiling: \"{message}\"")]
    ToleranceExceeded {
        level: LogLevel,
        max: LogLevel,
        message: String,
    },

    #[error("Timed out after {waited:?} waiting for completion on context '{context}'")]
    BridgeTimeout { context: String, waited: Duration },

    #[error("Bridged body failed: {message}")]
    Body { message: String },

    #[error("Execution context '{context}' is shut down")]
    ContextClosed { context: String },

    #[error("Failed to start execution context '{context}'")]
    Spawn {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {source}")]
    Config {
        #[source]
        source: Box<figment::Error>,
    },

    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },
}

/// Type alias for Result with HarnessError
pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    /// Create a tolerance violation for the offending record
    pub fn tolerance_exceeded(level: LogLevel, max: LogLevel, message: impl Into<String>) -> Self {
        Self::ToleranceExceeded {
            level,
            max,
            message: message.into(),
        }
    }

    /// Create a bridge timeout error
    pub fn bridge_timeout(context: impl Into<String>, waited: Duration) -> Self {
        Self::BridgeTimeout {
            context: context.into(),
            waited,
        }
    }

    /// Create a body failure error
    pub fn body(message: impl Into<String>) -> Self {
        Self::Body {
            message: message.into(),
        }
    }

    /// Create a closed-context error
    pub fn context_closed(context: impl Into<String>) -> Self {
        Self::ContextClosed {
            context: context.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a misuse of the sink install/uninstall pairing
    pub fn is_sink_misuse(&self) -> bool {
        matches!(self, Self::AlreadyInstalled | Self::NotInstalled)
    }
}

/// Convert from figment errors
impl From<figment::Error> for HarnessError {
    fn from(err: figment::Error) -> Self {
        HarnessError::Config {
            source: Box::new(err),
        }
    }
}

/// Helper trait for mutex operations that report poisoning as an error
pub trait SafeLock<T: ?Sized> {
    /// Lock a mutex, returning `MutexPoisoned` naming `resource` on poison
    fn safe_lock(&self, resource: &str) -> HarnessResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self, resource: &str) -> HarnessResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| HarnessError::MutexPoisoned {
            resource: resource.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_error_names_offending_message() {
        let err = HarnessError::tolerance_exceeded(
            LogLevel::Error,
            LogLevel::Warning,
            "network unreachable",
        );
        let text = err.to_string();
        assert!(text.contains("network unreachable"));
        assert!(text.contains("Error"));
        assert!(text.contains("Warning"));
    }

    #[test]
    fn test_sink_misuse_classification() {
        assert!(HarnessError::AlreadyInstalled.is_sink_misuse());
        assert!(HarnessError::NotInstalled.is_sink_misuse());
        assert!(!HarnessError::body("boom").is_sink_misuse());
    }

    #[test]
    fn test_poisoned_mutex_is_reported() {
        use std::sync::{Arc, Mutex};

        let shared = Arc::new(Mutex::new(0u32));
        let poisoner = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        match shared.safe_lock("counter") {
            Err(HarnessError::MutexPoisoned { resource }) => assert_eq!(resource, "counter"),
            other => panic!("expected MutexPoisoned, got {:?}", other.map(|g| *g)),
        };
    }
}
