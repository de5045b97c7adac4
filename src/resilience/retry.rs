//! Retry Logic
//!
//! Exponential backoff retry with jitter for transient refresh failures.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::RefreshError;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        DEFAULT_RETRY_CONFIG
    }
}

/// Default retry configuration.
pub const DEFAULT_RETRY_CONFIG: RetryConfig = RetryConfig {
    max_attempts: 3,
    initial_delay: Duration::from_millis(500),
    max_delay: Duration::from_secs(10),
    multiplier: 2.0,
    jitter: 0.1,
};

/// Errors that know whether another attempt can succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RefreshError {
    fn is_retryable(&self) -> bool {
        RefreshError::is_retryable(self)
    }
}

/// Retry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
}

/// Backoff retry executor.
pub struct RetryExecutor {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl RetryExecutor {
    /// Create new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the retry following `attempt` (zero-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.config.jitter;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Execute an operation, retrying retryable errors with backoff.
    ///
    /// `operation` receives the zero-based attempt number. The last error is
    /// returned once attempts are exhausted.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            self.record(|stats| stats.total_attempts += 1);

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        self.record(|stats| stats.successful_retries += 1);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt + 1 >= max_attempts {
                        self.record(|stats| stats.failed_operations += 1);
                        return Err(error);
                    }

                    tokio::time::sleep(self.calculate_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Get retry statistics.
    pub fn get_stats(&self) -> RetryStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut RetryStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            jitter: 0.0,
        });

        assert_eq!(executor.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(executor.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(executor.calculate_delay(2), Duration::from_millis(300));
        assert_eq!(executor.calculate_delay(6), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = executor
            .execute(move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RefreshError::transient("503"))
                } else {
                    Ok("token")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "token");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.get_stats().successful_retries, 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), _> = executor
            .execute(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RefreshError::transient("connection reset"))
            })
            .await;

        assert!(matches!(result, Err(RefreshError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            executor.get_stats(),
            RetryStats {
                total_attempts: 3,
                successful_retries: 0,
                failed_operations: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_expired_is_not_retried() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result: Result<(), _> = executor
            .execute(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RefreshError::Expired {
                    status: 401,
                    reason: "unauthorized".to_string(),
                })
            })
            .await;

        assert!(matches!(result, Err(RefreshError::Expired { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
