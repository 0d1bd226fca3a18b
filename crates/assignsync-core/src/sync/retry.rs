//! Exponential-backoff retry for provider calls.
//!
//! Only errors [`SyncError::is_retryable`] accepts are retried: rate limits,
//! 5xx, timeouts and connection failures. Client errors fail immediately.

use std::future::Future;
use std::time::Duration;

use super::SyncError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Upper bound on a server-requested wait.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, 0, 0)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Delay before retrying after `err`; rate limits honour `Retry-After`.
    fn delay_after(&self, err: &SyncError, attempt: u32) -> Duration {
        match err {
            SyncError::RateLimited(secs) if !self.max_delay.is_zero() => {
                Duration::from_secs(*secs).min(MAX_RATE_LIMIT_WAIT)
            }
            _ => self.delay_for_attempt(attempt),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = config.delay_after(&e, attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "provider call failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let config = RetryConfig::new(5, 100, 1000);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(1000));
    }

    #[test]
    fn rate_limit_wait_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(
            config.delay_after(&SyncError::RateLimited(5), 0),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.delay_after(&SyncError::RateLimited(600), 0),
            MAX_RATE_LIMIT_WAIT
        );
        assert!(RetryConfig::immediate(1)
            .delay_after(&SyncError::RateLimited(5), 0)
            .is_zero());
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::immediate(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SyncError::Unavailable("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Api {
                status: 503,
                message: "down".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::Api {
                status: 400,
                message: "bad".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
