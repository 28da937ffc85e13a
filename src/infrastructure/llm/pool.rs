//! Process-wide LLM connection pool.
//!
//! Bounds simultaneous in-flight requests across every consumer in the
//! process. A slot is acquired (blocking up to the configured acquire
//! timeout) before each request and released on completion, error, or
//! timeout via the slot guard's drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::errors::{DomainError, DomainResult};

/// Default bound on simultaneous in-flight requests.
pub const DEFAULT_CONCURRENCY: usize = 2;
/// Default seconds to wait for a slot.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 60;

/// Running pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub waiting: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_retries: u64,
}

/// Thread-safe slot pool for LLM backends.
pub struct LlmPool {
    semaphore: Arc<Semaphore>,
    stats: Mutex<PoolStats>,
    acquire_timeout: Duration,
    shutdown: AtomicBool,
}

impl LlmPool {
    pub fn new(max_concurrency: usize, acquire_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            stats: Mutex::new(PoolStats::default()),
            acquire_timeout,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(
            DEFAULT_CONCURRENCY,
            Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Acquire a slot, waiting up to the acquire timeout.
    ///
    /// The returned guard releases the slot when dropped, on every exit
    /// path.
    pub async fn acquire(self: &Arc<Self>) -> DomainResult<PoolSlot> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(DomainError::LlmError("pool is shut down".to_string()));
        }

        {
            let mut stats = self.stats.lock().expect("pool stats lock poisoned");
            stats.waiting += 1;
        }

        let acquired = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;

        let mut stats = self.stats.lock().expect("pool stats lock poisoned");
        stats.waiting = stats.waiting.saturating_sub(1);

        match acquired {
            Ok(Ok(permit)) => {
                stats.active += 1;
                stats.total_requests += 1;
                drop(stats);
                Ok(PoolSlot {
                    pool: Arc::clone(self),
                    _permit: permit,
                })
            }
            Ok(Err(_)) => Err(DomainError::LlmError("pool semaphore closed".to_string())),
            Err(_) => Err(DomainError::PoolTimeout),
        }
    }

    /// Record a backend error (e.g. 429, 503).
    pub fn record_error(&self) {
        let mut stats = self.stats.lock().expect("pool stats lock poisoned");
        stats.total_errors += 1;
    }

    /// Record a retry attempt.
    pub fn record_retry(&self) {
        let mut stats = self.stats.lock().expect("pool stats lock poisoned");
        stats.total_retries += 1;
    }

    /// Snapshot of the current statistics.
    pub fn stats(&self) -> PoolStats {
        *self.stats.lock().expect("pool stats lock poisoned")
    }

    /// Refuse new acquisitions. In-flight slots drain normally.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        let mut stats = self.stats.lock().expect("pool stats lock poisoned");
        stats.active = stats.active.saturating_sub(1);
    }
}

/// RAII slot guard. Dropping it returns the slot to the pool.
pub struct PoolSlot {
    pool: Arc<LlmPool>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_updates_stats() {
        let pool = LlmPool::new(2, Duration::from_millis(100));

        let slot = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.total_requests, 1);

        drop(slot);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn acquire_times_out_when_full() {
        let pool = LlmPool::new(1, Duration::from_millis(50));

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(DomainError::PoolTimeout)));
        assert_eq!(pool.stats().waiting, 0, "waiting counter must unwind");
    }

    #[tokio::test]
    async fn slot_frees_capacity_for_waiters() {
        let pool = LlmPool::new(1, Duration::from_secs(5));

        let first = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        waiter.await.unwrap().expect("waiter should get the slot");
        assert_eq!(pool.stats().total_requests, 2);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_acquisitions() {
        let pool = LlmPool::new(2, Duration::from_millis(50));
        pool.shutdown();
        assert!(pool.acquire().await.is_err());
    }

    #[tokio::test]
    async fn error_and_retry_counters() {
        let pool = LlmPool::with_defaults();
        pool.record_error();
        pool.record_error();
        pool.record_retry();
        let stats = pool.stats();
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.total_retries, 1);
    }
}
