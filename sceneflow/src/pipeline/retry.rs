//! Bounded retry with fixed backoff.
//!
//! Wraps a stage's raw action: transient failures are re-attempted after a
//! constant wait, terminal errors propagate immediately, and an exhausted
//! budget collapses into [`PipelineError::TooManyAttempts`] carrying the
//! last underlying error. Cancellation interrupts both the action and the
//! backoff wait.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::cancellation::CancellationToken;
use crate::errors::PipelineError;

/// Retry budget and pacing for one stage action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: usize,
    /// Fixed wait between attempts. Not exponential.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy: 3 attempts, 1s backoff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt budget. Clamped to at least 1.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the fixed backoff between attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs `op` under this policy.
    ///
    /// Each failed attempt is logged at warn with its ordinal and cause
    /// before the backoff wait. The first success short-circuits. Errors
    /// that are not retryable propagate untouched, as does cancellation.
    pub async fn execute<T, F, Fut>(
        &self,
        token: &CancellationToken,
        label: &str,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            if token.is_cancelled() {
                return Err(cancelled(token));
            }

            let outcome = tokio::select! {
                outcome = op() => outcome,
                () = token.cancelled() => return Err(cancelled(token)),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            warn!(
                action = label,
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "attempt failed"
            );

            if attempt >= self.max_attempts {
                return Err(PipelineError::TooManyAttempts {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            tokio::select! {
                () = tokio::time::sleep(self.backoff) => {}
                () = token.cancelled() => return Err(cancelled(token)),
            }
        }
    }
}

fn cancelled(token: &CancellationToken) -> PipelineError {
    PipelineError::Cancelled(token.reason().unwrap_or_else(|| "cancelled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(attempts)
            .with_backoff(Duration::from_millis(1))
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_attempts_clamped_to_one() {
        let policy = RetryPolicy::new().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result = quick(3)
            .execute(&token, "probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.expect("should succeed"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = quick(3)
            .execute(&token, "probe", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PipelineError::Remote(format!("failure {n}")))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_after_exact_budget() {
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = quick(3)
            .execute(&token, "probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::Remote("always down".into())) }
            })
            .await;

        let err = result.expect_err("budget exhausted");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            PipelineError::TooManyAttempts { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, PipelineError::Remote(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_waits_backoff_between_attempts_only() {
        let token = CancellationToken::new();
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_backoff(Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = policy
            .execute(&token, "probe", || async {
                Err(PipelineError::Remote("always down".into()))
            })
            .await;

        assert!(result.is_err());
        // 3 attempts, 2 backoff waits, none after the final failure.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_empty_result_is_retried() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = quick(2)
            .execute(&token, "probe", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(PipelineError::EmptyResult)
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("retried"), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let token = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = quick(5)
            .execute(&token, "probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::Decode("bad png".into())) }
            })
            .await;

        assert!(matches!(
            result.expect_err("terminal"),
            PipelineError::Decode(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_stops_attempts() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_backoff(Duration::from_secs(60));

        let task = {
            let token = token.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                policy
                    .execute(&token, "probe", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(PipelineError::Remote("down".into())) }
                    })
                    .await
            })
        };

        // Let the first attempt fail and the backoff begin.
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel("shutdown");

        let result = tokio::time::timeout(Duration::from_millis(200), task)
            .await
            .expect("should stop within a scheduling quantum")
            .expect("task should not panic");

        assert!(matches!(result, Err(PipelineError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel("early");
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = quick(3)
            .execute(&token, "probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
