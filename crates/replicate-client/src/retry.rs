//! `withTimeout`/`withRetry` combinators: small composable wrappers around a
//! future rather than a full effect system.

use replicate_types::prelude::*;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for retryable network errors.
pub const BACKOFF_SCHEDULE_MS: &[u64] = &[500, 1000, 2000, 4000];
pub const BACKOFF_CAP_MS: u64 = 30_000;

/// Race `fut` against a deadline, surfacing `Timeout` if it loses.
pub async fn with_timeout<T>(duration: Duration, fut: impl Future<Output = ClResult<T>>) -> ClResult<T> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(format!("operation exceeded {duration:?}"))),
    }
}

/// Retry `f` while it fails with a retryable [`Error`]
/// (`NetworkError{retryable=true}`), backing off per [`BACKOFF_SCHEDULE_MS`]
/// and capping at [`BACKOFF_CAP_MS`]. Non-retryable errors return immediately.
pub async fn with_retry<T, Fut>(mut f: impl FnMut() -> Fut) -> ClResult<T>
where
    Fut: Future<Output = ClResult<T>>,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                let delay_ms = BACKOFF_SCHEDULE_MS.get(attempt).copied().unwrap_or(BACKOFF_CAP_MS);
                warn!(attempt, delay_ms, "retrying after retryable error: {e}");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(e) => {
                debug!("non-retryable error, giving up: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn with_timeout_passes_through_success() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_timeout_surfaces_timeout_error() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        })
        .await;
        assert!(matches!(result.unwrap_err().kind, ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn with_retry_gives_up_immediately_on_non_retryable_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let result: ClResult<()> = with_retry(|| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::not_found())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_retryable_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let result = with_retry(|| {
            let calls = Arc::clone(&calls_clone);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::network(true, "transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

// vim: ts=4
