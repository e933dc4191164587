use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::DataAccessError;

/// Invoke `op`, retrying transient failures with exponential back-off.
///
/// The delay before attempt `n+1` is `base_delay * 2^(n-1)`. Permanent
/// failures (constraint violations, malformed statements) are re-raised
/// immediately; a transient failure on the final attempt is wrapped in
/// `RetriesExhausted`. The back-off is an async sleep, so other work proceeds
/// during the delay.
///
/// Retrying does not deduplicate side effects: wrap only idempotent
/// statements or whole transactions, which are atomic either way.
///
/// # Errors
/// The operation's own error (permanent), or `RetriesExhausted` wrapping the
/// last transient failure.
pub async fn with_retry<F, Fut, R>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<R, DataAccessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, DataAccessError>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(DataAccessError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn busy_error() -> DataAccessError {
        DataAccessError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy,
                extended_code: 5,
            },
            Some("database is locked".to_string()),
        ))
    }

    fn constraint_error() -> DataAccessError {
        DataAccessError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::ConstraintViolation,
                extended_code: 19,
            },
            Some("UNIQUE constraint failed".to_string()),
        ))
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result = with_retry(&quick_policy(), "test", move || {
            let calls = Arc::clone(&calls_in);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy_error())
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&quick_policy(), "test", move || {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(constraint_error())
            }
        })
        .await;
        assert!(matches!(result, Err(DataAccessError::Sqlite(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error_and_reports_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&quick_policy(), "test", move || {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(busy_error())
            }
        })
        .await;
        match result {
            Err(DataAccessError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delay_doubles_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        let started = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);
        let result: Result<(), _> = with_retry(&policy, "test", move || {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(busy_error())
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(DataAccessError::RetriesExhausted { .. })
        ));
        // 100ms after attempt 1, 200ms after attempt 2.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }
}
