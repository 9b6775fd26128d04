//! Retry with exponential backoff for page fetches.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::models::CrawlerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        what,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::{ConnectionError, ParseError};
    use crate::source::PageKind;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(250));
        assert_eq!(p.delay_after(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_connection_errors_until_success() {
        let calls = &AtomicU32::new(0);
        let result = policy()
            .run("terms", &CancellationToken::new(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::from(ConnectionError::new("terms", "HTTP 503")))
                } else {
                    Ok("page")
                }
            })
            .await;

        assert_eq!(result, Ok("page"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("terms", &CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::from(ConnectionError::new("terms", "timeout")))
            })
            .await;

        assert!(matches!(result, Err(FetchError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parse_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run("terms", &CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::from(ParseError::missing(
                    PageKind::TermList,
                    "select",
                )))
            })
            .await;

        assert!(matches!(result, Err(FetchError::Parse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = policy().run("terms", &cancel, || async { Ok(()) }).await;
        assert_eq!(result, Err(FetchError::Cancelled));
    }
}
