//! Retry Wrapper
//!
//! Exponential-backoff retry around a fallible async operation. The delay
//! before retry `n` (1-based) is `base_delay + backoff_unit * 2^(n-1)`, which
//! with the defaults gives 1.5s, 2.5s, 4.5s, ...

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    backoff_unit: Duration,
}

impl RetryPolicy {
    /// Constant part of every backoff delay
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

    /// Exponential part of the backoff delay for the first retry
    pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

    /// Create a policy allowing `max_retries` retries with the default backoff
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Self::DEFAULT_BASE_DELAY,
            backoff_unit: Self::DEFAULT_BACKOFF_UNIT,
        }
    }

    /// A policy that invokes the operation exactly once
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Replace the backoff delays
    pub fn with_backoff(mut self, base_delay: Duration, backoff_unit: Duration) -> Self {
        self.base_delay = base_delay;
        self.backoff_unit = backoff_unit;
        self
    }

    /// Number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the given retry (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_add(self.backoff_unit.saturating_mul(factor))
    }

    /// Run `operation` until it succeeds or the retries are exhausted
    ///
    /// The operation receives the 1-based attempt number. The error of the
    /// last attempt is returned when every attempt failed.
    pub async fn execute<F, Fut, R, E>(&self, mut operation: F) -> Result<R, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt <= self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Batch handler attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::batch::DEFAULT_RETRY_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(u32::MAX);
        assert!(policy.delay_for(64) >= policy.delay_for(32));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<u32, String> = RetryPolicy::new(3)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(1500 + 2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries() {
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = RetryPolicy::new(2)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("attempt {attempt} failed")) }
            })
            .await;

        assert_eq!(result, Err("attempt 3 failed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_none_invokes_once() {
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = RetryPolicy::none()
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("rejected") }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
