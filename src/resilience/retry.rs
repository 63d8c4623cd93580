// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Provides configurable retry behavior for transient failures, with an
//! optional per-attempt deadline so a hung request counts as a failed attempt
//! instead of stalling the caller.
//!
//! # Example
//!
//! ```
//! use offline_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on a bad persistence path
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Sync fetch: a few quick attempts, each bounded by a deadline
//! let fetch = RetryConfig::fetch(Duration::from_secs(10));
//! assert_eq!(fetch.max_retries, Some(3));
//! assert_eq!(fetch.attempt_timeout, Some(Duration::from_secs(10)));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// Configuration for operation retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
    /// Deadline applied to each individual attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening persistence at startup.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            attempt_timeout: None,
        }
    }

    /// Quick retry for individual storage queries.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            attempt_timeout: None,
        }
    }

    /// Remote fetch: three attempts, each aborted after `attempt_timeout`.
    #[must_use]
    pub fn fetch(attempt_timeout: Duration) -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            factor: 2.0,
            attempt_timeout: Some(attempt_timeout),
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            attempt_timeout: None,
        }
    }

    /// Delay before the attempt following `failed_attempts` failures.
    #[must_use]
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let exp = self.factor.powi(failed_attempts.saturating_sub(1).min(31) as i32);
        self.initial_delay.mul_f64(exp).min(self.max_delay)
    }
}

/// Error produced by [`retry`] when an attempt deadline elapses.
pub trait DeadlineError {
    fn deadline_elapsed(operation: &str, after: Duration) -> Self;
}

impl DeadlineError for crate::storage::StorageError {
    fn deadline_elapsed(operation: &str, after: Duration) -> Self {
        crate::storage::StorageError::Backend(format!("{} timed out after {:?}", operation, after))
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + DeadlineError,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        let outcome = match config.attempt_timeout {
            Some(limit) => match timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(E::deadline_elapsed(operation_name, limit)),
            },
            None => operation().await,
        };

        match outcome {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if let Some(max) = config.max_retries {
                    if attempts >= max {
                        return Err(err);
                    }
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, attempts, max, err, delay
                    );
                } else {
                    warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, attempts, err, delay
                    );
                }

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl DeadlineError for TestError {
        fn deadline_elapsed(operation: &str, _after: Duration) -> Self {
            TestError(format!("{} deadline", operation))
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || async { Ok(42) },
        ).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(TestError(format!("fail {}", count)))
                    } else {
                        Ok(42)
                    }
                }
            },
        ).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry(
            "test_op",
            &RetryConfig::test(),
            || {
                let a = attempts_clone.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(TestError("always fail".to_string()))
                }
            },
        ).await;

        assert!(result.unwrap_err().0.contains("always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_deadline_counts_as_failure() {
        let config = RetryConfig {
            attempt_timeout: Some(Duration::from_millis(50)),
            ..RetryConfig::test()
        };

        let result: Result<i32, TestError> = retry(
            "slow_op",
            &config,
            || async {
                sleep(Duration::from_secs(60)).await;
                Ok(1)
            },
        ).await;

        assert_eq!(result.unwrap_err().0, "slow_op deadline");
    }

    #[test]
    fn test_delay_for_is_exponential_and_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
            max_retries: Some(5),
            attempt_timeout: None,
        };

        assert_eq!(config.delay_for(0), Duration::ZERO);
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
        assert_eq!(config.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn test_fetch_preset_overrides_keep_deadline() {
        let config = RetryConfig {
            initial_delay: Duration::ZERO,
            max_retries: Some(5),
            ..RetryConfig::fetch(Duration::from_secs(4))
        };

        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(4)));
        assert_eq!(config.max_delay, Duration::from_secs(8));
        assert_eq!(config.max_retries, Some(5));
        assert_eq!(config.delay_for(3), Duration::ZERO);
    }
}
