//! Per-call retry policy for cloud-service operations.

use std::future::Future;

use tracing::warn;

use crate::error::CloudError;
use crate::types::RetrySettings;

/// Run one cloud-service call with transient-failure retry.
///
/// `op` is invoked once per attempt; it must build a fresh request over
/// the same stable byte view each time. Timeout-class failures retry
/// immediately; connection-class failures back off by
/// `attempt * connect_backoff`. Non-transient failures and exhausted
/// attempts propagate.
///
/// # Arguments
/// * `settings` - Retry policy knobs
/// * `what` - Operation label for log lines
/// * `op` - Closure producing the call future, invoked per attempt
pub async fn call_with_retry<T, F, Fut>(
    settings: &RetrySettings,
    what: &str,
    mut op: F,
) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < settings.max_attempts => {
                warn!(op = what, attempt, error = %err, "transient failure, retrying");
                if let CloudError::Connect(_) = err {
                    tokio::time::sleep(settings.connect_backoff * attempt).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn settings(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            connect_backoff: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let calls: AtomicU32 = AtomicU32::new(0);
        let result: Result<i32, CloudError> = call_with_retry(&settings(10), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeouts_retry_until_success() {
        let calls: AtomicU32 = AtomicU32::new(0);
        let result: Result<i32, CloudError> = call_with_retry(&settings(10), "op", || {
            let n: u32 = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(CloudError::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let calls: AtomicU32 = AtomicU32::new(0);
        let result: Result<(), CloudError> = call_with_retry(&settings(10), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CloudError::Timeout) }
        })
        .await;
        assert!(matches!(result, Err(CloudError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_persistent_error_not_retried() {
        let calls: AtomicU32 = AtomicU32::new(0);
        let result: Result<(), CloudError> = call_with_retry(&settings(10), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(CloudError::Api {
                    status: 401,
                    message: "invalid_access_token".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(CloudError::Api { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_back_off_linearly() {
        let start = tokio::time::Instant::now();
        let calls: AtomicU32 = AtomicU32::new(0);
        let result: Result<i32, CloudError> = call_with_retry(&settings(10), "op", || {
            let n: u32 = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(CloudError::Connect("name resolution failed".into()))
                } else {
                    Ok(1)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        // Attempts 1..=3 failed: delays 1s + 2s + 3s.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_failures_do_not_sleep() {
        let start = tokio::time::Instant::now();
        let calls: AtomicU32 = AtomicU32::new(0);
        let _ = call_with_retry(&settings(5), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(CloudError::Timeout) }
        })
        .await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
