//! Bounded dispatch of detached provisioning tasks.
//!
//! Lifecycle operations return "accepted" immediately; the provisioner work
//! runs on a detached tokio task. A semaphore caps how many run at once, and
//! each task gets a cancellation token cancelled after the policy timeout —
//! deliberately decoupled from the lifetime of the request that triggered it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Clone)]
pub struct DispatchPool {
    permits: Arc<Semaphore>,
    op_timeout: Duration,
}

impl DispatchPool {
    pub fn new(max_concurrent: usize, op_timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            op_timeout,
        }
    }

    /// Spawn `task` detached. Waits (inside the spawned task, never in the
    /// caller) for a permit, then runs the task with a token that cancels
    /// once the policy timeout elapses.
    pub fn dispatch<F, Fut>(&self, label: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let op_timeout = self.op_timeout;

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Semaphore closed only during shutdown.
                    warn!("Dispatch pool closed, dropping {} task", label);
                    return;
                }
            };

            let token = CancellationToken::new();
            let deadline = token.clone();
            let watchdog = tokio::spawn(async move {
                tokio::time::sleep(op_timeout).await;
                deadline.cancel();
            });

            task(token).await;
            watchdog.abort();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_tasks_run_detached() {
        let pool = DispatchPool::new(4, Duration::from_secs(10));
        let (tx, rx) = tokio::sync::oneshot::channel();

        pool.dispatch("test", move |_token| async move {
            tx.send(42).ok();
        });

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = DispatchPool::new(1, Duration::from_secs(10));
        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let done = Arc::new(Semaphore::new(0));

        for _ in 0..3 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            pool.dispatch("test", move |_token| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.add_permits(1);
            });
        }

        let _ = done.acquire_many(3).await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_timeout_cancels_token() {
        let pool = DispatchPool::new(1, Duration::from_millis(10));
        let (tx, rx) = tokio::sync::oneshot::channel();

        pool.dispatch("test", move |token| async move {
            token.cancelled().await;
            tx.send(true).ok();
        });

        assert!(rx.await.unwrap());
    }
}
