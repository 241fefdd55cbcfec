//! # Logger Service
//!
//! This crate implements structured logging behind the `log` facade.
//!
//! ## Philosophy
//!
//! Logging is explicit and structured: every record becomes a [`LogEntry`]
//! with a level, a target, a source process and key/value fields, rendered
//! one line per entry to stderr.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Per-message traffic
    Trace,
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Most verbose `log` filter that still lets this level through
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => LogLevel::Trace,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Error => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown log level: {0}")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(UnknownLogLevel(s.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A structured log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Module or subsystem that produced the entry
    pub target: String,
    /// Source process (if known)
    pub source: Option<u32>,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Creates a new log entry
    pub fn new(level: LogLevel, message: String) -> Self {
        Self {
            level,
            target: String::new(),
            source: None,
            message,
            fields: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Sets the source process
    pub fn with_source(mut self, pid: u32) -> Self {
        self.source = Some(pid);
        self
    }

    /// Adds a field to the log entry
    pub fn with_field(mut self, key: String, value: String) -> Self {
        self.fields.push((key, value));
        self
    }

    fn from_record(record: &log::Record<'_>) -> Self {
        let mut entry = LogEntry::new(record.level().into(), record.args().to_string())
            .with_target(record.target())
            .with_source(std::process::id());
        if let Some(name) = std::thread::current().name() {
            entry = entry.with_field("thread".to_string(), name.to_string());
        }
        entry
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:<5}", self.level)?;
        if let Some(pid) = self.source {
            write!(f, " pid={}", pid)?;
        }
        if !self.target.is_empty() {
            write!(f, " {}", self.target)?;
        }
        write!(f, "] {}", self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// `log` backend writing one [`LogEntry`] per line to stderr
pub struct StructuredLogger {
    level: LogLevel,
}

impl StructuredLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl log::Log for StructuredLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        LogLevel::from(metadata.level()) >= self.level
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let entry = LogEntry::from_record(record);
        let _ = writeln!(std::io::stderr().lock(), "{}", entry);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Installs the process-wide logger
pub fn init(level: LogLevel) -> Result<(), log::SetLoggerError> {
    log::set_boxed_logger(Box::new(StructuredLogger::new(level)))?;
    log::set_max_level(level.to_level_filter());
    Ok(())
}

/// Level named by an environment variable, if set and valid
pub fn level_from_env(var: &str) -> Option<LogLevel> {
    std::env::var(var).ok().and_then(|value| value.parse().ok())
}
