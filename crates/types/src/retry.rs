//! Retry-with-backoff executor
//!
//! Wraps any unreliable operation with a bounded retry loop. Transient
//! failures trigger another attempt up to `max_retries + 1` total tries;
//! terminal failures abort immediately. When a backoff is configured the
//! delay between attempts strictly doubles from the initial delay, capped
//! at `max_backoff`.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::errors::{PipelineError, Result};

/// Retry tuning for one class of operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first; total tries = max_retries + 1
    pub max_retries: u32,
    /// Delay before the first retry; None retries immediately
    pub initial_backoff: Option<Duration>,
    /// Upper bound on any single backoff delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: None,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Dispatch-path policy: bounded retries, no delay between attempts
    pub fn for_dispatch(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: None,
            ..Self::default()
        }
    }

    /// Batch-commit policy: delays double from `initial_backoff`
    pub fn for_batch_commit(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff: Some(initial_backoff),
            ..Self::default()
        }
    }

    /// Delay to apply before the given attempt (1-based; the first attempt
    /// never waits). Retry N waits `initial * 2^(N-1)`, capped.
    pub fn backoff_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 {
            return None;
        }
        let initial = self.initial_backoff?;
        let exp = (attempt - 2).min(16);
        let delay = initial.saturating_mul(2u32.pow(exp));
        Some(delay.min(self.max_backoff))
    }
}

/// Outcome of a retry sequence
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Total tries performed, including the first
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Executes operations under a [`RetryPolicy`].
///
/// The attempt sequence for a single operation is strictly ordered: attempt
/// N+1 never starts before attempt N's outcome is known. Exhausting the
/// attempts yields a terminal outcome the caller records; it is never
/// re-raised as fatal to the surrounding worker.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    if let Some(delay) = self.policy.backoff_before(attempt + 1) {
                        warn!(
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "attempt failed, retrying after backoff"
                        );
                        sleep(delay).await;
                    } else {
                        warn!(attempt, max_attempts, error = %err, "attempt failed, retrying");
                    }
                }
                Err(err) => {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}
