//! Exponential backoff for embedding and vector-store calls.
//!
//! Only errors reporting [`IndexError::is_transient`] are retried. The
//! budget applies to one call, never to a whole batch or run.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{IndexError, Result};

/// Run `op` up to `max_retries + 1` times.
///
/// Delay before attempt `n` (1-based retry count) is `base_ms * 2^(n-1)`,
/// with the exponent capped at 5.
pub async fn with_backoff<T, F, Fut>(max_retries: u32, base_ms: u64, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let delay = Duration::from_millis(base_ms.saturating_mul(1 << (attempt - 1).min(5)));
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < max_retries => {
                debug!(attempt = attempt + 1, error = %e, "transient failure, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Apply a per-call timeout, mapping expiry to a transient error built by
/// `on_timeout`.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    fut: Fut,
    on_timeout: impl FnOnce() -> IndexError,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let out = with_backoff(3, 1, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(IndexError::provider("test", "rate limited", true))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_backoff(5, 1, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(IndexError::provider("test", "bad request", false))
        })
        .await
        .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_backoff(2, 1, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(IndexError::store("memory", "unreachable", true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeout_maps_to_error() {
        let err = with_timeout(
            Duration::from_millis(5),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            || IndexError::provider("slow", "timed out", true),
        )
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }
}
