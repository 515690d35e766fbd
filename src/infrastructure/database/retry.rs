//! Bounded retry of store round-trips.
//!
//! Only errors that report themselves as transient are re-attempted. Anything
//! else, and the last transient failure once the budget is spent, goes back to
//! the caller untouched.

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryConfig;
use crate::error::DbError;
use crate::metrics::RetryMetrics;

use super::backoff::{BackoffConfig, ExponentialBackoff};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for DbError {
    fn is_transient(&self) -> bool {
        DbError::is_transient(self)
    }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, BackoffConfig::default())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, BackoffConfig::from(config))
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` attempts have been made.
///
/// `operation` is called afresh for every attempt, so anything it opens (a
/// session, a connection) is never reused across attempts.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut backoff = ExponentialBackoff::with_config(policy.backoff.clone());
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                tracing::debug!(operation, attempt, error = %e, "Non-transient error, not retrying");
                return Err(e);
            }
            Err(e) if attempt >= policy.max_attempts => {
                RetryMetrics::record_exhausted(operation);
                tracing::error!(
                    operation,
                    attempts = attempt,
                    error = %e,
                    "Max retry attempts reached"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                RetryMetrics::record_retry(operation);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 5,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
        )
    }

    fn transient() -> DbError {
        DbError::from(sqlx::Error::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))
    }

    #[tokio::test]
    async fn test_always_transient_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result: Result<(), DbError> = with_retry(&policy, "test_always_transient", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result: Result<(), DbError> = with_retry(&policy, "test_non_transient", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::not_found("application", 7))
        })
        .await;

        assert!(matches!(result, Err(DbError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result = with_retry(&policy, "test_recovers", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(transient())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let calls = AtomicU32::new(0);

        let result: Result<(), DbError> =
            with_retry(&RetryPolicy::no_retry(), "test_single_attempt", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct Permanent;

    impl Display for Permanent {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("permanent")
        }
    }

    impl Retryable for Permanent {
        fn is_transient(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_custom_retryable_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), Permanent> = tokio_test::block_on(with_retry(
            &fast_policy(5),
            "test_custom_error",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Permanent)
            },
        ));

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff.initial_delay_ms, 500);

        assert_eq!(RetryPolicy::new(0, BackoffConfig::default()).max_attempts, 1);
    }
}
