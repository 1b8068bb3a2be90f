//! Transient-error retry with exponential backoff and jitter.
//!
//! Only transient store errors are retried; validation, conflict, and
//! constraint errors surface immediately. On exhaustion the last error
//! is returned and the caller elevates it to a run-level failure.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::domain::error::StoreError;
use crate::domain::models::config::RetryConfig;

/// Run a store operation, retrying transient failures.
pub async fn with_store_retry<T, F, Fut>(
    config: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
        .with_max_interval(Duration::from_millis(config.max_backoff_ms))
        .with_max_elapsed_time(None)
        .build();

    let attempts = AtomicU32::new(0);
    let max_attempts = config.max_attempts.max(1);

    backoff::future::retry(policy, || {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(op = op_name, attempt, error = %e, "transient store error, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_store_retry(&fast_config(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::ConnectionFailed("busy".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_store_retry(&fast_config(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::ConstraintViolation("unique".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_store_retry(&fast_config(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::ConnectionFailed("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::ConnectionFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
