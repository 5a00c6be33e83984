// Purpose: capture the client's log stream for the duration of one test and
// answer containment queries over it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::errors::{HarnessError, HarnessResult, SafeLock};
use crate::occurrence::{count_occurrences, MatchOptions};

/// LogLevel classifies the severity of log output, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Verbose => "Verbose",
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = HarnessError;

    fn from_str(input: &str) -> Result<LogLevel, Self::Err> {
        match input.to_lowercase().as_str() {
            "verbose" | "trace" | "debug" => Ok(LogLevel::Verbose),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(HarnessError::invalid_config(
                "max_log_level",
                format!("unknown log level '{other}'"),
            )),
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Verbose,
        }
    }
}

/// LogRecord is one immutable entry of the client's log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub info: Option<String>,
    pub code: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            info: None,
            code: None,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Text this record contributes to `partition`, if any.
    pub fn render(&self, partition: LogPartition) -> Option<&str> {
        match partition {
            LogPartition::Level => Some(self.level.as_str()),
            LogPartition::Message => Some(&self.message),
            LogPartition::Info => self.info.as_deref(),
            LogPartition::Code => self.code.as_deref(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.level, self.message)?;
        if let Some(info) = &self.info {
            write!(f, " | {info}")?;
        }
        if let Some(code) = &self.code {
            write!(f, " | {code}")?;
        }
        if let Some(id) = &self.correlation_id {
            write!(f, " | {id}")?;
        }
        Ok(())
    }
}

/// Named projection of a record used for containment queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogPartition {
    Level,
    Message,
    Info,
    Code,
}

#[derive(Debug, Default)]
struct SinkState {
    installed: bool,
    records: Vec<LogRecord>,
}

/// Capture buffer for a single test.
///
/// Clones share the same buffer, so a handle can be given to a
/// [`SinkLayer`](crate::capture_layer::SinkLayer) or moved onto another
/// execution context while the test keeps querying its own handle.
/// Records offered while the sink is not installed are discarded.
#[derive(Debug, Clone)]
pub struct LogSink {
    state: Arc<Mutex<SinkState>>,
    options: MatchOptions,
    echo: bool,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(MatchOptions::default())
    }
}

impl LogSink {
    pub fn new(options: MatchOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState::default())),
            options,
            echo: false,
        }
    }

    /// Print every captured record to stderr as it arrives.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn match_options(&self) -> MatchOptions {
        self.options
    }

    pub fn install(&self) -> HarnessResult<()> {
        let mut state = self.state.safe_lock("log_sink")?;
        if state.installed {
            return Err(HarnessError::AlreadyInstalled);
        }
        state.installed = true;
        state.records.clear();
        Ok(())
    }

    /// Ends capture and drops whatever was captured.
    pub fn uninstall(&self) -> HarnessResult<()> {
        let mut state = self.state.safe_lock("log_sink")?;
        if !state.installed {
            return Err(HarnessError::NotInstalled);
        }
        state.installed = false;
        state.records.clear();
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        self.read().installed
    }

    /// Whether both handles share one record buffer.
    pub fn same_sink(&self, other: &LogSink) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Appends `record`. Returns `false` when the sink is not installed.
    pub fn capture(&self, record: LogRecord) -> bool {
        let mut state = self.read();
        if !state.installed {
            return false;
        }
        if self.echo {
            eprintln!("[LOG] {}", record);
        }
        state.records.push(record);
        true
    }

    /// Entry point shaped like the client's log callback.
    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        info: Option<&str>,
        code: Option<&str>,
        correlation_id: Option<Uuid>,
    ) -> bool {
        let record = LogRecord {
            level,
            message: message.to_string(),
            info: info.map(str::to_string),
            code: code.map(str::to_string),
            correlation_id,
            timestamp: Utc::now(),
        };
        self.capture(record)
    }

    /// Discards all records without ending capture.
    pub fn clear(&self) {
        self.read().records.clear();
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the captured records in insertion order.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.read().records.clone()
    }

    /// Concatenated rendering of one partition, one line per contributing record.
    pub fn partition_text(&self, partition: LogPartition) -> String {
        let state = self.read();
        let mut text = String::new();
        for rendered in state.records.iter().filter_map(|r| r.render(partition)) {
            text.push_str(rendered);
            text.push('\n');
        }
        text
    }

    /// Number of occurrences of `needle` in the partition's text.
    pub fn query(&self, partition: LogPartition, needle: &str) -> usize {
        count_occurrences(&self.partition_text(partition), needle, self.options)
    }

    pub fn contains(&self, partition: LogPartition, needle: &str) -> bool {
        self.query(partition, needle) > 0
    }

    /// Captured records as pretty JSON, for failure reports.
    pub fn dump(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot())
            .unwrap_or_else(|e| format!("<unserializable log: {e}>"))
    }

    // A panic while holding the lock cannot leave a half-pushed record,
    // so a poisoned buffer is still consistent.
    fn read(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
