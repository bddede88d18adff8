//! Bounded retries and time budgets for store calls

use std::future::Future;
use std::time::Duration;

use crate::config::{StoreConfig, TimeoutConfig};
use crate::error::{SiccError, SiccResult};

/// Retry policy for transient store failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n * backoff`
    pub backoff: Duration,
    /// Budget for a single attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(store: &StoreConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            max_attempts: store.retry_attempts.max(1),
            backoff: Duration::from_millis(store.retry_backoff_ms),
            attempt_timeout: Some(timeouts.store()),
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
            attempt_timeout: None,
        }
    }
}

/// Run `fut` under a time budget, mapping expiry to [`SiccError::Timeout`]
pub async fn with_timeout<T, Fut>(budget: Duration, operation: &str, fut: Fut) -> SiccResult<T>
where
    Fut: Future<Output = SiccResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(SiccError::timeout(operation, budget.as_millis() as u64)),
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts. The last error is surfaced.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> SiccResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SiccResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match policy.attempt_timeout {
            Some(budget) => with_timeout(budget, operation, op()).await,
            None => op().await,
        };

        match result {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Transient store error, retrying"
                );
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(operation, attempts = attempt, error = %e, "Store retries exhausted");
                }
                return Err(e);
            }
            Ok(value) => return Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
            attempt_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result = with_retry(&fast_policy(3), "insert", move || async move {
            if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SiccError::transient("database is locked"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_surfaces_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: SiccResult<()> = with_retry(&fast_policy(2), "insert", move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Err(SiccError::transient("connection reset"))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result: SiccResult<()> = with_retry(&fast_policy(5), "get", move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Err(SiccError::not_found("Pattern", "pat_x"))
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let err = with_timeout(Duration::from_millis(10), "embedding", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("embedding"));

        let ok = with_timeout(Duration::from_secs(1), "embedding", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }
}
