//! Counting semaphore bounding how many agents are in flight.
//!
//! `AgentSemaphore` hands out permits in FIFO order: a release always goes to
//! the oldest suspended caller, or back to the pool when nobody is waiting.
//! The permit count is clamped to at least one so a misconfigured cap of zero
//! cannot deadlock the executor.
//!
//! # Example
//!
//! ```rust,ignore
//! use cortex_orchestrator::semaphore::AgentSemaphore;
//!
//! let semaphore = AgentSemaphore::new(2);
//! let value = semaphore.execute(|| async { 40 + 2 }).await;
//! assert_eq!(value, 42);
//! assert_eq!(semaphore.available_permits(), 2);
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

/// A counting semaphore with FIFO waiters and guarded execution.
#[derive(Debug, Clone)]
pub struct AgentSemaphore {
    inner: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
}

/// A held permit. Dropping it releases the permit.
#[derive(Debug)]
#[must_use = "dropping the permit releases it immediately"]
pub struct SemaphorePermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl SemaphorePermit {
    /// Release the permit explicitly.
    pub fn release(self) {
        drop(self);
    }
}

/// Decrements the waiter count even if the acquire future is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AgentSemaphore {
    /// Create a semaphore with `permits` permits (minimum 1).
    pub fn new(permits: usize) -> Self {
        let capacity = permits.max(1);
        Self {
            inner: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configured number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }

    /// Number of callers suspended in [`acquire`](Self::acquire).
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Wait for a permit.
    ///
    /// Waiters are served in the order they called `acquire`.
    pub async fn acquire(&self) -> SemaphorePermit {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let _guard = WaitingGuard(&self.waiting);

        let permit = self
            .inner
            .clone()
            .acquire_owned()
            .await
            .expect("agent semaphore is never closed");

        SemaphorePermit { _permit: permit }
    }

    /// Take a permit without waiting.
    pub fn try_acquire(&self) -> Option<SemaphorePermit> {
        self.inner
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SemaphorePermit { _permit: permit })
    }

    /// Run the future built by `f` while holding a permit.
    ///
    /// `f` is only called once the permit is held, so no part of the work
    /// starts before its turn. The permit is released however the future
    /// finishes, including when it returns an error or panics.
    pub async fn execute<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }
}

impl Default for AgentSemaphore {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_zero_permits_clamped() {
        let semaphore = AgentSemaphore::new(0);
        assert_eq!(semaphore.capacity(), 1);
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_acquire_release_restores_permits() {
        let semaphore = AgentSemaphore::new(3);

        let mut permits = Vec::new();
        for _ in 0..3 {
            permits.push(semaphore.acquire().await);
        }
        assert_eq!(semaphore.available_permits(), 0);
        assert!(semaphore.try_acquire().is_none());

        for permit in permits {
            permit.release();
        }
        assert_eq!(semaphore.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_try_acquire() {
        let semaphore = AgentSemaphore::new(1);
        let permit = semaphore.try_acquire();
        assert!(permit.is_some());
        assert!(semaphore.try_acquire().is_none());
        drop(permit);
        assert!(semaphore.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_execute_serializes_with_single_permit() {
        let semaphore = AgentSemaphore::new(1);
        let start = Instant::now();

        let hold = || {
            let semaphore = semaphore.clone();
            async move {
                semaphore
                    .execute(|| tokio::time::sleep(Duration::from_millis(100)))
                    .await
            }
        };
        tokio::join!(hold(), hold());

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_execute_builds_work_after_acquiring() {
        let semaphore = AgentSemaphore::new(1);
        let started = Arc::new(AtomicUsize::new(0));

        let held = semaphore.acquire().await;
        let pending = {
            let started = started.clone();
            semaphore.execute(move || {
                started.fetch_add(1, Ordering::SeqCst);
                async {}
            })
        };
        tokio::pin!(pending);

        // Poll once: the permit is still held so `f` must not run yet.
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(started.load(Ordering::SeqCst), 0);

        drop(held);
        pending.await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_bounds_concurrency() {
        let semaphore = AgentSemaphore::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let semaphore = semaphore.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                semaphore
                    .execute(|| async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(semaphore.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_execute_releases_on_error() {
        let semaphore = AgentSemaphore::new(1);
        let result: Result<(), String> = semaphore.execute(|| async { Err("boom".into()) }).await;
        assert!(result.is_err());
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_execute_releases_on_panic() {
        let semaphore = AgentSemaphore::new(1);
        let inner = semaphore.clone();
        let handle = tokio::spawn(async move {
            inner
                .execute(|| async {
                    panic!("agent crashed");
                })
                .await
        });
        assert!(handle.await.is_err());
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_waiters_served_in_fifo_order() {
        let semaphore = AgentSemaphore::new(1);
        let held = semaphore.acquire().await;
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let waiter = semaphore.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = waiter.acquire().await;
                order.lock().await.push(i);
            }));
            // Let each waiter enqueue before the next one.
            while semaphore.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
        assert_eq!(semaphore.waiting(), 0);
    }
}
