use crate::errors::{HarnessError, HarnessResult};
use crate::log_sink::{LogLevel, LogSink};

/// Maximum log severity a test may emit before teardown fails it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToleranceGate {
    max_level: LogLevel,
}

impl Default for ToleranceGate {
    /// Fails on any Warning or Error.
    fn default() -> Self {
        Self {
            max_level: LogLevel::Info,
        }
    }
}

impl ToleranceGate {
    pub fn new(max_level: LogLevel) -> Self {
        Self { max_level }
    }

    pub fn configure(&mut self, max_level: LogLevel) {
        self.max_level = max_level;
    }

    pub fn max_level(&self) -> LogLevel {
        self.max_level
    }

    pub fn permits(&self, level: LogLevel) -> bool {
        level <= self.max_level
    }

    /// Fails with the earliest captured record above the ceiling.
    pub fn evaluate(&self, sink: &LogSink) -> HarnessResult<()> {
        match sink.snapshot().into_iter().find(|r| !self.permits(r.level)) {
            Some(record) => Err(HarnessError::tolerance_exceeded(
                record.level,
                self.max_level,
                record.message,
            )),
            None => Ok(()),
        }
    }
}
