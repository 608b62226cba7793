use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::SyncError;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound for a single backoff delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Exponential backoff capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retries are exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    let delay = self.delay(attempt);
                    warn!(
                        query = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(16));
        assert_eq!(policy.delay(5), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retries_until_exhausted() {
        tokio::time::pause();
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = RetryPolicy::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Network("offline".into())) }
            })
            .await;
        assert_eq!(result, Err(SyncError::Network("offline".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = RetryPolicy::default()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Validation("bad".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        tokio::time::pause();
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::remote("busy"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
    }
}
