//! Exponential backoff shared by the page fetcher and the PostgreSQL store.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Backoff settings for a bounded retry loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// ```text
    /// delay  = min(base * 2^(attempt-1), max)
    /// jitter = random(0, delay/4)
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_retry_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }
}

/// Run `op` until it succeeds or the policy runs out of attempts, sleeping
/// with backoff between failures. Every error is treated as retryable.
pub async fn retry_async<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts() => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Calculate retry delay with exponential backoff and jitter, in milliseconds
pub fn calculate_retry_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay = base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(max_delay_ms);

    // jitter keeps concurrent retries from lining up
    let jitter_range = delay / 4;
    if jitter_range == 0 {
        return delay;
    }
    delay + rand::random::<u64>() % jitter_range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially_with_bounded_jitter() {
        for _ in 0..20 {
            let first = calculate_retry_delay(1, 1000, 30_000);
            let second = calculate_retry_delay(2, 1000, 30_000);
            let third = calculate_retry_delay(3, 1000, 30_000);
            assert!((1000..1250).contains(&first));
            assert!((2000..2500).contains(&second));
            assert!((4000..5000).contains(&third));
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let delay = calculate_retry_delay(30, 1000, 5000);
        assert!((5000..6250).contains(&delay));
    }

    #[test]
    fn test_zero_base_delay_does_not_panic() {
        assert_eq!(calculate_retry_delay(1, 0, 0), 0);
        assert_eq!(calculate_retry_delay(3, 1, 10), 4);
    }

    #[test]
    fn test_policy_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
    }

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_retry_async_recovers_after_failures() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<u32, String> = retry_async(&quick_policy(3), "connect", || {
            let call = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            async move {
                if call < 3 {
                    Err(format!("refused #{}", call))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_gives_up_with_last_error() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), String> = retry_async(&quick_policy(2), "connect", || {
            let call = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            async move { Err(format!("refused #{}", call)) }
        })
        .await;

        assert_eq!(result, Err("refused #3".to_string()));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
