//! Diagnostic notices
//!
//! The adapter reports notable outcomes (creates, opens, renames, deletes and
//! their failures) as [`LogEntry`] values handed to an injected [`LogSink`].
//! Sinks are called synchronously and cannot fail the operation that emitted
//! the notice.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Notice severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Verbose detail
    Verbose,
    /// Informational
    Information,
    /// Recoverable problem
    Warning,
    /// Operation failed
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Verbose => "verbose",
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(name)
    }
}

/// A single diagnostic notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the notice was raised
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub severity: Severity,
    /// Emitting component
    pub source: String,
    /// Human-readable message
    pub message: String,
}

impl LogEntry {
    /// Create a notice stamped with the current time
    pub fn new(severity: Severity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Receiver of diagnostic notices
pub trait LogSink: Send + Sync {
    /// Accept a notice
    fn log(&self, entry: LogEntry);
}

/// Forwards notices to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, entry: LogEntry) {
        let source = entry.source.as_str();
        match entry.severity {
            Severity::Verbose => debug!(source, "{}", entry.message),
            Severity::Information => info!(source, "{}", entry.message),
            Severity::Warning => warn!(source, "{}", entry.message),
            Severity::Error => error!(source, "{}", entry.message),
        }
    }
}

/// Discards every notice
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _entry: LogEntry) {}
}
