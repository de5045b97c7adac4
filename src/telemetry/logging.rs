//! Logging
//!
//! Structured logging for credential operations. [`TracingLogger`] forwards
//! to the `tracing` ecosystem; [`InMemoryLogger`] captures entries for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Credential log context. Never carries token values.
#[derive(Debug, Clone, Default)]
pub struct CredentialLogContext {
    /// Operation name.
    pub operation: Option<String>,
    /// Store involved, if any.
    pub store: Option<String>,
    /// Additional context.
    pub extra: BTreeMap<String, String>,
}

impl CredentialLogContext {
    /// Create new log context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set operation.
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set store.
    pub fn store(mut self, store: impl Into<String>) -> Self {
        self.store = Some(store.into());
        self
    }

    /// Add extra context.
    pub fn extra(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }
}

/// Logger interface.
pub trait Logger: Send + Sync {
    /// Log at trace level.
    fn trace(&self, message: &str, context: &CredentialLogContext);

    /// Log at debug level.
    fn debug(&self, message: &str, context: &CredentialLogContext);

    /// Log at info level.
    fn info(&self, message: &str, context: &CredentialLogContext);

    /// Log at warn level.
    fn warn(&self, message: &str, context: &CredentialLogContext);

    /// Log at error level.
    fn error(&self, message: &str, context: &CredentialLogContext);

    /// Check if a log level is enabled.
    fn is_enabled(&self, level: LogLevel) -> bool;
}

/// No-op logger implementation.
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn trace(&self, _message: &str, _context: &CredentialLogContext) {}
    fn debug(&self, _message: &str, _context: &CredentialLogContext) {}
    fn info(&self, _message: &str, _context: &CredentialLogContext) {}
    fn warn(&self, _message: &str, _context: &CredentialLogContext) {}
    fn error(&self, _message: &str, _context: &CredentialLogContext) {}
    fn is_enabled(&self, _level: LogLevel) -> bool {
        false
    }
}

/// No-op logger singleton.
pub fn no_op_logger() -> NoOpLogger {
    NoOpLogger
}

/// Logger emitting `tracing` events under the `fleet_auth` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

macro_rules! emit {
    ($level:ident, $message:expr, $context:expr) => {
        tracing::$level!(
            target: "fleet_auth",
            operation = $context.operation.as_deref().unwrap_or(""),
            store = $context.store.as_deref().unwrap_or(""),
            extra = ?$context.extra,
            "{}",
            $message
        )
    };
}

impl Logger for TracingLogger {
    fn trace(&self, message: &str, context: &CredentialLogContext) {
        emit!(trace, message, context);
    }

    fn debug(&self, message: &str, context: &CredentialLogContext) {
        emit!(debug, message, context);
    }

    fn info(&self, message: &str, context: &CredentialLogContext) {
        emit!(info, message, context);
    }

    fn warn(&self, message: &str, context: &CredentialLogContext) {
        emit!(warn, message, context);
    }

    fn error(&self, message: &str, context: &CredentialLogContext) {
        emit!(error, message, context);
    }

    fn is_enabled(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Trace => tracing::enabled!(target: "fleet_auth", tracing::Level::TRACE),
            LogLevel::Debug => tracing::enabled!(target: "fleet_auth", tracing::Level::DEBUG),
            LogLevel::Info => tracing::enabled!(target: "fleet_auth", tracing::Level::INFO),
            LogLevel::Warn => tracing::enabled!(target: "fleet_auth", tracing::Level::WARN),
            LogLevel::Error => tracing::enabled!(target: "fleet_auth", tracing::Level::ERROR),
        }
    }
}

/// Log entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: CredentialLogContext,
    pub timestamp: DateTime<Utc>,
}

/// In-memory logger for testing.
pub struct InMemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
    min_level: LogLevel,
}

impl InMemoryLogger {
    /// Create new in-memory logger.
    pub fn new() -> Self {
        Self::with_level(LogLevel::Trace)
    }

    /// Create in-memory logger with minimum level.
    pub fn with_level(min_level: LogLevel) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            min_level,
        }
    }

    /// Get all log entries.
    pub fn get_entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Get entries by level.
    pub fn get_entries_by_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.get_entries()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn log(&self, level: LogLevel, message: &str, context: &CredentialLogContext) {
        if level < self.min_level {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(LogEntry {
                level,
                message: message.to_string(),
                context: context.clone(),
                timestamp: Utc::now(),
            });
        }
    }
}

impl Default for InMemoryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for InMemoryLogger {
    fn trace(&self, message: &str, context: &CredentialLogContext) {
        self.log(LogLevel::Trace, message, context);
    }

    fn debug(&self, message: &str, context: &CredentialLogContext) {
        self.log(LogLevel::Debug, message, context);
    }

    fn info(&self, message: &str, context: &CredentialLogContext) {
        self.log(LogLevel::Info, message, context);
    }

    fn warn(&self, message: &str, context: &CredentialLogContext) {
        self.log(LogLevel::Warn, message, context);
    }

    fn error(&self, message: &str, context: &CredentialLogContext) {
        self.log(LogLevel::Error, message, context);
    }

    fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

/// Create in-memory logger for testing.
pub fn create_in_memory_logger() -> InMemoryLogger {
    InMemoryLogger::new()
}

/// Create the default `tracing`-backed logger.
pub fn create_tracing_logger() -> TracingLogger {
    TracingLogger::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Debug);
        assert!(LogLevel::Debug > LogLevel::Trace);
    }

    #[test]
    fn test_in_memory_logger() {
        let logger = InMemoryLogger::new();
        let context = CredentialLogContext::new()
            .operation("refresh")
            .store("cloud_secret");

        logger.info("Refreshing access token", &context);
        logger.debug("Debug info", &context);
        logger.warn("Secret backend unreachable", &context);

        assert_eq!(logger.get_entries().len(), 3);

        let warnings = logger.get_entries_by_level(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].context.store.as_deref(), Some("cloud_secret"));
    }

    #[test]
    fn test_log_context_builder() {
        let context = CredentialLogContext::new()
            .operation("ensure_valid_token")
            .store("local_file")
            .extra("attempt", 2);

        assert_eq!(context.operation.as_deref(), Some("ensure_valid_token"));
        assert_eq!(context.extra.get("attempt").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_min_level_filtering() {
        let logger = InMemoryLogger::with_level(LogLevel::Warn);
        let context = CredentialLogContext::new();

        logger.trace("trace", &context);
        logger.debug("debug", &context);
        logger.info("info", &context);
        logger.warn("warn", &context);
        logger.error("error", &context);

        assert_eq!(logger.get_entries().len(), 2);
    }

    #[test]
    fn test_tracing_logger_without_subscriber() {
        let logger = TracingLogger::new();
        logger.warn(
            "no subscriber installed",
            &CredentialLogContext::new().operation("test"),
        );
    }
}
