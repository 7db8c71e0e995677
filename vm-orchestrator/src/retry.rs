//! Bounded-retry executor for provisioner calls.
//!
//! Retries are sequential with a constant inter-attempt delay; no backoff,
//! no jitter, and no inspection of the error to decide retry-worthiness.
//! Every provisioner interaction, including soft deletion, goes through
//! this path with the same attempt budget.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Attempt budget and inter-attempt delay for one logical operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// The cancellation token fired before an attempt or during the
    /// inter-attempt delay. Distinguishable from exhaustion so the caller
    /// can record a timeout rather than a backend failure.
    #[error("operation canceled before completion")]
    Canceled,

    /// Every attempt failed; carries the error from the final attempt.
    #[error("{0}")]
    Exhausted(E),
}

/// Invoke `op` up to `policy.max_attempts` times, returning the first
/// success. The token is checked before every attempt, and the
/// inter-attempt sleep races against it.
pub async fn execute<T, E, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    // An attempt budget of zero would make `last_err` unreachable below.
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        if token.is_cancelled() {
            return Err(RetryError::Canceled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err),
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = token.cancelled() => return Err(RetryError::Canceled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }

    match last_err {
        Some(err) => Err(RetryError::Exhausted(err)),
        // Unreachable: max_attempts >= 1 guarantees at least one attempt ran.
        None => Err(RetryError::Canceled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_k_failures() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let result = execute(&fast_policy(5), &token, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 2 {
                    Err(format!("attempt {} failed", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let result: Result<(), _> = execute(&fast_policy(3), &token, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(format!("attempt {} failed", n)) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted(msg)) => assert_eq!(msg, "attempt 3 failed"),
            other => panic!("expected Exhausted, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_first_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let result: Result<&str, RetryError<String>> = execute(&fast_policy(3), &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("done") }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_prevents_any_attempt() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<(), RetryError<String>> = execute(&fast_policy(3), &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Canceled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_during_delay_stops_retries() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_secs(60),
        };

        let inner = token.clone();
        let result: Result<(), RetryError<String>> = execute(&policy, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            // Cancel while the executor sleeps between attempts.
            inner.cancel();
            async { Err("always fails".to_string()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Canceled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
