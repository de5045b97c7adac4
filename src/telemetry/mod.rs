//! Telemetry
//!
//! Structured logging for credential operations.

pub mod logging;

pub use logging::{
    create_in_memory_logger, create_tracing_logger, no_op_logger, CredentialLogContext,
    InMemoryLogger, LogEntry, LogLevel, Logger, NoOpLogger, TracingLogger,
};
