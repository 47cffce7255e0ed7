//! Execution logs: per-value diagnostics, their aggregation across inputs, and
//! the reference-counted verbosity policy that decides how much detail to keep.

use std::sync::Arc;

use ahash::HashMap;
use parking_lot::Mutex;

use crate::value::ValueSpecification;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogLevel {
    /// Something prevented a correct value.
    Error,
    /// The value was produced but deserves attention.
    Warn,
    /// Informational.
    Info,
}

/// Presence flags for each [`LogLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogLevels {
    /// At least one error was logged.
    pub error: bool,
    /// At least one warning was logged.
    pub warn: bool,
    /// At least one info event was logged.
    pub info: bool,
}

impl LogLevels {
    /// No level present.
    pub const NONE: LogLevels = LogLevels {
        error: false,
        warn: false,
        info: false,
    };

    /// Set the flag for `level`.
    pub fn insert(&mut self, level: LogLevel) {
        match level {
            LogLevel::Error => self.error = true,
            LogLevel::Warn => self.warn = true,
            LogLevel::Info => self.info = true,
        }
    }

    /// Whether the flag for `level` is set.
    pub fn contains(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Error => self.error,
            LogLevel::Warn => self.warn,
            LogLevel::Info => self.info,
        }
    }

    /// Flag-wise OR.
    #[must_use]
    pub fn union(self, other: LogLevels) -> LogLevels {
        LogLevels {
            error: self.error || other.error,
            warn: self.warn || other.warn,
            info: self.info || other.info,
        }
    }

    /// Returns true if no flag is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

/// One diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEvent {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
}

/// Summary of a failure captured while computing a value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionSummary {
    /// Type name of the failure.
    pub class: String,
    /// Failure message.
    pub message: Option<String>,
    /// Condensed stack or error chain.
    pub stack: Option<String>,
}

impl ExceptionSummary {
    /// Summarize an error, using its chain of sources as the stack summary.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let chain: Vec<String> = error.chain().skip(1).map(|e| e.to_string()).collect();
        Self {
            class: "anyhow::Error".to_string(),
            message: Some(error.to_string()),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

/// How much detail to capture in an execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutionLogMode {
    /// Level flags and captured failures only.
    #[default]
    Indicators,
    /// Level flags plus every event.
    Full,
}

/// Diagnostics for a single value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionLog {
    levels: LogLevels,
    events: Option<Vec<LogEvent>>,
    exception: Option<ExceptionSummary>,
}

impl ExecutionLog {
    /// An empty log recording events according to `mode`.
    pub fn new(mode: ExecutionLogMode) -> Self {
        Self {
            levels: LogLevels::NONE,
            events: match mode {
                ExecutionLogMode::Indicators => None,
                ExecutionLogMode::Full => Some(Vec::new()),
            },
            exception: None,
        }
    }

    /// Record an event. The level flag is always set; the event itself is only
    /// kept in [`ExecutionLogMode::Full`].
    pub fn record(&mut self, level: LogLevel, message: impl Into<String>) {
        self.levels.insert(level);
        if let Some(events) = &mut self.events {
            events.push(LogEvent {
                level,
                message: message.into(),
            });
        }
    }

    /// Capture a failure. Implies an error.
    pub fn capture_exception(&mut self, exception: ExceptionSummary) {
        self.levels.insert(LogLevel::Error);
        self.exception = Some(exception);
    }

    /// Level flags.
    pub fn levels(&self) -> LogLevels {
        self.levels
    }

    /// Recorded events, if the log was created in full mode.
    pub fn events(&self) -> Option<&[LogEvent]> {
        self.events.as_deref()
    }

    /// Captured failure, if any.
    pub fn exception(&self) -> Option<&ExceptionSummary> {
        self.exception.as_ref()
    }

    /// Returns true if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.exception.is_none()
    }
}

/// A value's own log inside an aggregated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The value that produced the log.
    pub source: ValueSpecification,
    /// The log itself.
    pub log: Arc<ExecutionLog>,
}

/// A value's log combined with the logs of everything it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregatedExecutionLog {
    levels: LogLevels,
    entries: Option<Vec<LogEntry>>,
    exception: Option<ExceptionSummary>,
}

impl AggregatedExecutionLog {
    /// An aggregate with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Aggregate of a single value with no inputs.
    pub fn leaf(source: ValueSpecification, log: ExecutionLog, mode: ExecutionLogMode) -> Self {
        let levels = log.levels();
        let exception = log.exception().cloned();
        let entries = match mode {
            ExecutionLogMode::Indicators => None,
            ExecutionLogMode::Full if log.is_empty() => Some(Vec::new()),
            ExecutionLogMode::Full => Some(vec![LogEntry {
                source,
                log: Arc::new(log),
            }]),
        };
        Self {
            levels,
            entries,
            exception,
        }
    }

    /// Combine `own` with the aggregates of its inputs.
    ///
    /// Flags are OR-ed across everything and the failure is `own`'s, or else
    /// the first input's that has one. In full mode the entries are `own`'s
    /// followed by each input's in the order supplied, so aggregating in
    /// layers gives the same result as aggregating all leaves at once.
    pub fn aggregate(
        own: &AggregatedExecutionLog,
        inputs: &[AggregatedExecutionLog],
        mode: ExecutionLogMode,
    ) -> Self {
        let levels = inputs
            .iter()
            .fold(own.levels, |acc, input| acc.union(input.levels));
        let entries = match mode {
            ExecutionLogMode::Indicators => None,
            ExecutionLogMode::Full => {
                let mut entries = own.entries.clone().unwrap_or_default();
                for input in inputs {
                    if let Some(input_entries) = &input.entries {
                        entries.extend(input_entries.iter().cloned());
                    }
                }
                Some(entries)
            }
        };
        let exception = own
            .exception
            .as_ref()
            .or_else(|| inputs.iter().find_map(|input| input.exception.as_ref()))
            .cloned();
        Self {
            levels,
            entries,
            exception,
        }
    }

    /// Level flags across the value and all its inputs.
    pub fn levels(&self) -> LogLevels {
        self.levels
    }

    /// The captured failure, kept in every mode.
    pub fn exception(&self) -> Option<&ExceptionSummary> {
        self.exception.as_ref()
    }

    /// Per-value logs, own first, if aggregated in full mode.
    pub fn entries(&self) -> Option<&[LogEntry]> {
        self.entries.as_deref()
    }

    /// Mode this aggregate carries detail for.
    pub fn mode(&self) -> ExecutionLogMode {
        if self.entries.is_some() {
            ExecutionLogMode::Full
        } else {
            ExecutionLogMode::Indicators
        }
    }
}

/// Reference-counted, per-value log verbosity overrides.
///
/// A value is logged in [`ExecutionLogMode::Full`] while at least one caller
/// has elevated it, and in [`ExecutionLogMode::Indicators`] otherwise.
#[derive(Debug, Default)]
pub struct ExecutionLogModeSource {
    elevated: Mutex<HashMap<ValueSpecification, u32>>,
}

impl ExecutionLogModeSource {
    /// A source with no elevated values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Elevate each value by one reference.
    pub fn elevate<'a>(&self, values: impl IntoIterator<Item = &'a ValueSpecification>) {
        let mut elevated = self.elevated.lock();
        for value in values {
            *elevated.entry(value.clone()).or_insert(0) += 1;
        }
    }

    /// Drop one elevation reference from each value.
    pub fn restore<'a>(&self, values: impl IntoIterator<Item = &'a ValueSpecification>) {
        let mut elevated = self.elevated.lock();
        for value in values {
            match elevated.get_mut(value) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    elevated.remove(value);
                }
                None => {
                    tracing::warn!(%value, "restoring log verbosity of a value that is not elevated");
                }
            }
        }
    }

    /// Effective mode for `value`.
    pub fn mode(&self, value: &ValueSpecification) -> ExecutionLogMode {
        if self.elevated.lock().contains_key(value) {
            ExecutionLogMode::Full
        } else {
            ExecutionLogMode::Indicators
        }
    }

    /// Number of outstanding elevation references for `value`.
    pub fn elevation_count(&self, value: &ValueSpecification) -> u32 {
        self.elevated.lock().get(value).copied().unwrap_or(0)
    }

    /// Number of values currently elevated.
    pub fn elevated_len(&self) -> usize {
        self.elevated.lock().len()
    }
}
