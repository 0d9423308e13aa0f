//! Six-level log entries carried through tier contexts

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Log severity; `Fail` marks an unrecoverable tier error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fail,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fail => "fail",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Address of the tier that logged, rendered for display
    pub origin: String,
    pub message: String,
    /// Milliseconds since the unix epoch
    pub time: u64,
}

impl LogEntry {
    pub fn new(level: LogLevel, origin: impl Into<String>, message: impl fmt::Display) -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        LogEntry {
            level,
            origin: origin.into(),
            message: message.to_string(),
            time,
        }
    }

    /// Emit this entry through `tracing`
    pub fn emit(&self) {
        let origin = self.origin.as_str();
        let message = self.message.as_str();
        match self.level {
            LogLevel::Trace => tracing::trace!(origin, "{}", message),
            LogLevel::Debug => tracing::debug!(origin, "{}", message),
            LogLevel::Info => tracing::info!(origin, "{}", message),
            LogLevel::Warn => tracing::warn!(origin, "{}", message),
            LogLevel::Error => tracing::error!(origin, "{}", message),
            LogLevel::Fail => tracing::error!(origin, fail = true, "{}", message),
        }
    }
}
