//! Bounded retry with a fixed backoff.
//!
//! Every provider goes through the same policy: at most `max_attempts` calls,
//! a fixed pause between attempts the classifier marks as retryable, and no
//! pause after the last attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Attempt budget and pause between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed pause inserted before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    fn budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

/// Result of a retried operation plus how much of the budget it used.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    /// Number of times the operation was invoked.
    pub attempts: u32,
    /// Number of backoff pauses taken.
    pub waits: u32,
}

/// Run `op` until it succeeds, the classifier aborts, or the budget runs out.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    mut classify: C,
    mut op: Op,
) -> Retried<T, E>
where
    E: Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> RetryDecision,
{
    let budget = policy.budget();
    let mut waits = 0;
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts: attempt,
                    waits,
                }
            }
            Err(err) => {
                if attempt >= budget || classify(&err) == RetryDecision::Abort {
                    return Retried {
                        result: Err(err),
                        attempts: attempt,
                        waits,
                    };
                }

                warn!(
                    attempt,
                    max_attempts = budget,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                if !policy.backoff.is_zero() {
                    sleep(policy.backoff).await;
                }
                waits += 1;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum Failure {
        Busy,
        Broken,
    }

    impl Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn classify(err: &Failure) -> RetryDecision {
        match err {
            Failure::Busy => RetryDecision::Retry,
            Failure::Broken => RetryDecision::Abort,
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn succeeds_after_two_retryable_failures() {
        let calls = AtomicU32::new(0);
        let out = retry_with_backoff(&fast(), classify, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Failure::Busy)
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(out.result, Ok("done"));
        assert_eq!(out.attempts, 3);
        assert_eq!(out.waits, 2);
    }

    #[tokio::test]
    async fn exhausts_budget_without_trailing_wait() {
        let out: Retried<(), Failure> =
            retry_with_backoff(&fast(), classify, |_| async { Err(Failure::Busy) }).await;

        assert_eq!(out.result, Err(Failure::Busy));
        assert_eq!(out.attempts, 3);
        assert_eq!(out.waits, 2);
    }

    #[tokio::test]
    async fn aborts_on_fatal_failure() {
        let out: Retried<(), Failure> =
            retry_with_backoff(&fast(), classify, |_| async { Err(Failure::Broken) }).await;

        assert_eq!(out.attempts, 1);
        assert_eq!(out.waits, 0);
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let out: Retried<u8, Failure> =
            retry_with_backoff(&fast(), classify, |attempt| async move {
                Ok(attempt as u8)
            })
            .await;

        assert_eq!(out.result, Ok(1));
        assert_eq!(out.waits, 0);
    }

    #[tokio::test]
    async fn zero_budget_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let out: Retried<(), Failure> =
            retry_with_backoff(&policy, classify, |_| async { Err(Failure::Busy) }).await;
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_for_the_configured_backoff() {
        let policy = RetryPolicy::new(2, Duration::from_secs(10));
        let start = tokio::time::Instant::now();
        let out: Retried<(), Failure> =
            retry_with_backoff(&policy, classify, |_| async { Err(Failure::Busy) }).await;

        assert_eq!(out.waits, 1);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
