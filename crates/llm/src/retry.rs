//! Retry with exponential backoff for transient HTTP failures.
//!
//! Shared by the chat providers here and the embedding providers in
//! `kbase-knowledge`. Only errors classified as [`AppError::Transient`] are
//! retried; everything else fails fast.

use kbase_core::{AppError, AppResult};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// Backoff schedule for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Wait before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound for any single wait
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt cap and default waits.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Override the wait bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt cap is hit.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    label,
                    attempt,
                    policy.max_attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!("{} gave up after {} attempts: {}", label, attempt, e);
                }
                return Err(e);
            }
        }
    }
}

/// Map a non-success HTTP status to an error.
///
/// 408, 429 and 5xx are transient; other statuses go through `fatal`.
pub fn status_error(
    provider: &str,
    status: StatusCode,
    body: &str,
    fatal: fn(String) -> AppError,
) -> AppError {
    let message = format!("{} API error ({}): {}", provider, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        AppError::Transient(message)
    } else {
        fatal(message)
    }
}

/// Map a transport error to an error; timeouts and connect failures are transient.
pub fn transport_error(
    provider: &str,
    err: reqwest::Error,
    fatal: fn(String) -> AppError,
) -> AppError {
    let message = format!("Failed to send request to {}: {}", provider, err);
    if err.is_timeout() || err.is_connect() {
        AppError::Transient(message)
    } else {
        fatal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
    }

    #[test]
    fn test_status_classification() {
        let err = status_error("test", StatusCode::TOO_MANY_REQUESTS, "slow down", AppError::Llm);
        assert!(err.is_transient());

        let err = status_error("test", StatusCode::BAD_GATEWAY, "", AppError::Llm);
        assert!(err.is_transient());

        let err = status_error("test", StatusCode::UNAUTHORIZED, "bad key", AppError::Embedding);
        assert!(matches!(err, AppError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&fast_policy(3), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::Transient("timeout".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_at_attempt_cap() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = with_retries(&fast_policy(3), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Transient("429".to_string())) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = with_retries(&fast_policy(3), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Llm("400 bad request".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn delay_is_monotonic_and_capped(attempt in 1u32..64) {
            let policy = RetryPolicy::default();
            let current = policy.delay_for(attempt);
            prop_assert!(current <= policy.max_backoff);
            prop_assert!(current >= policy.delay_for(attempt.saturating_sub(1).max(1)));
        }
    }
}
