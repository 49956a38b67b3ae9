//! Bounded fixed-delay retry for transient transport failures.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::error::{CoreError, Result};

/// Errors surfaced by [`RetryExecutor::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The attempt bound was below 1; the operation was never invoked.
    #[error("Retry attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    /// Every attempt failed. Carries the error of the final attempt.
    #[error("Operation failed after {attempts} attempt(s)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// The error of the final attempt, if the bound was exhausted.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } => Some(source),
            Self::InvalidMaxAttempts(_) => None,
        }
    }
}

/// Validated retry configuration used by bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// Default delay between attempts.
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

    /// Default attempt bound.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Build a policy. Rejects a zero attempt bound.
    pub fn new(delay: Duration, max_attempts: u32) -> Result<Self> {
        if max_attempts < 1 {
            return Err(CoreError::InvalidRetryAttempts(max_attempts));
        }
        Ok(Self {
            delay,
            max_attempts,
        })
    }

    /// Policy that never retries: one attempt, no delay.
    pub fn once() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: 1,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Self::DEFAULT_DELAY,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Runs an async operation up to a bounded number of times with a fixed
/// delay between attempts.
///
/// There is no backoff, no jitter and no classification of failures: every
/// error counts against the bound and the delay between attempts is
/// constant. The failure of the final attempt is surfaced to the caller
/// inside [`RetryError::Exhausted`] rather than swallowed.
pub struct RetryExecutor;

impl RetryExecutor {
    pub async fn execute<T, E, F, Fut>(
        delay: Duration,
        max_attempts: u32,
        mut operation: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: std::error::Error,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if max_attempts < 1 {
            return Err(RetryError::InvalidMaxAttempts(max_attempts));
        }
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: error,
                    });
                }
                Err(error) => {
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying after fixed delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// [`Self::execute`] with bounds taken from a validated policy.
    pub async fn execute_with_policy<T, E, F, Fut>(
        policy: &RetryPolicy,
        operation: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: std::error::Error,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        Self::execute(policy.delay, policy.max_attempts, operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Error)]
    #[error("transport glitch")]
    struct Glitch;

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<u32, RetryError<Glitch>> =
            RetryExecutor::execute(Duration::from_millis(10), 3, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryExecutor::execute(Duration::from_millis(200), 5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err(Glitch) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_final_error_and_count() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), RetryError<Glitch>> =
            RetryExecutor::execute(Duration::from_millis(50), 3, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Glitch) }
            })
            .await;
        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "transport glitch");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_a_precondition_violation() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), RetryError<Glitch>> =
            RetryExecutor::execute(Duration::from_millis(50), 0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::InvalidMaxAttempts(0))));
        // The operation must never run when the bound is invalid.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_and_no_sleep_after_final_failure() {
        let start = tokio::time::Instant::now();
        let result: std::result::Result<(), RetryError<Glitch>> =
            RetryExecutor::execute(Duration::from_millis(100), 3, || async { Err(Glitch) }).await;
        assert!(result.is_err());
        // Two sleeps between three attempts, none after the last one.
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_never_sleeps() {
        let start = tokio::time::Instant::now();
        let result: std::result::Result<(), RetryError<Glitch>> =
            RetryExecutor::execute(Duration::from_secs(60), 1, || async { Err(Glitch) }).await;
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 1, .. })
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_with_policy() {
        let policy = RetryPolicy::new(Duration::from_millis(10), 2).unwrap();
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), RetryError<Glitch>> =
            RetryExecutor::execute_with_policy(&policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Glitch) }
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            RetryError::Exhausted { attempts: 2, .. }
        ));
        assert!(err.into_source().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_policy_rejects_zero_attempts() {
        assert!(matches!(
            RetryPolicy::new(Duration::from_millis(10), 0),
            Err(CoreError::InvalidRetryAttempts(0))
        ));
    }

    #[test]
    fn test_policy_accessors_and_default() {
        let policy = RetryPolicy::new(Duration::from_millis(250), 4).unwrap();
        assert_eq!(policy.delay(), Duration::from_millis(250));
        assert_eq!(policy.max_attempts(), 4);

        let default = RetryPolicy::default();
        assert_eq!(default.delay(), RetryPolicy::DEFAULT_DELAY);
        assert_eq!(default.max_attempts(), RetryPolicy::DEFAULT_MAX_ATTEMPTS);

        assert_eq!(RetryPolicy::once().max_attempts(), 1);
        assert_eq!(RetryPolicy::once().delay(), Duration::ZERO);
    }
}
