//! Resilience
//!
//! Exponential backoff retry with jitter for transient refresh failures.

pub mod retry;

pub use retry::{RetryConfig, RetryExecutor, RetryStats, Retryable, DEFAULT_RETRY_CONFIG};
