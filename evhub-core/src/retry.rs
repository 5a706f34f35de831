//! Retry policy applied by callers of [`crate::store::CheckpointStore`] and
//! [`crate::transport::Transport`] around individual operations.
//!
//! The store and transport traits surface transient failures directly
//! rather than retrying internally (spec.md §4.1); this is the local
//! backoff loop that wraps each call.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Operation, Result};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RetryMode {
    Fixed,
    Exponential,
}

/// Retry behavior for store/transport operations.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryOptions {
    pub mode: RetryMode,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub try_timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            mode: RetryMode::Exponential,
            max_retries: 3,
            delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(60),
            try_timeout: Duration::from_secs(60),
        }
    }
}

/// Stateless policy derived from [`RetryOptions`]; computes the delay for a
/// given attempt index and drives the retry loop in [`RetryPolicy::run`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    /// Delay before attempt `attempt` (0-indexed; attempt 0 is the first
    /// retry, not the initial try).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = match self.options.mode {
            RetryMode::Fixed => self.options.delay,
            RetryMode::Exponential => {
                let factor = 2u32.saturating_pow(attempt);
                self.options.delay.saturating_mul(factor)
            }
        };
        std::cmp::min(delay, self.options.max_delay)
    }

    /// Run `f`, retrying on [`Error::is_retryable`] failures up to
    /// `max_retries` times. Each individual attempt is bounded by
    /// `try_timeout`; a timed-out attempt counts as a transient failure of
    /// the given `operation`.
    pub async fn run<F, Fut, T>(&self, operation: Operation, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.options.try_timeout, f()).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    Err(Error::transient(operation, format!("{operation} timed out")))
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.options.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(%operation, attempt, ?delay, error = %err, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(%operation, attempt, error = %err, "giving up after exhausting retries");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::new(RetryOptions {
            mode: RetryMode::Fixed,
            delay: Duration::from_millis(100),
            ..RetryOptions::default()
        });
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(100));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(RetryOptions {
            mode: RetryMode::Exponential,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryOptions::default()
        });
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350)); // would be 400, capped
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_transient_errors_until_success() {
        let policy = RetryPolicy::new(RetryOptions {
            delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            ..RetryOptions::default()
        });
        let calls = AtomicU32::new(0);

        let result = policy
            .run(Operation::ListCheckpoints, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::transient(Operation::ListCheckpoints, "not yet"))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(RetryOptions {
            max_retries: 2,
            delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            ..RetryOptions::default()
        });
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run(Operation::UpdateCheckpoint, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::transient(Operation::UpdateCheckpoint, "still failing"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test(start_paused = true)]
    async fn run_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::new(RetryOptions::default());
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run(Operation::ClaimOwnership, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::permanent(Operation::ClaimOwnership, "not allowed"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
