//! Concurrency slot pool.
//!
//! Every step's execute hook runs under a global concurrency ceiling. The
//! pool is a counting semaphore with FIFO waiters and an optional
//! per-acquisition timeout: a waiter is either eventually granted a slot or
//! fails with a distinguishable timeout error, never silently dropped.
//!
//! Built on `tokio::sync::Semaphore`, whose acquire order is FIFO-fair.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrently executing steps.
pub const DEFAULT_LIMIT: usize = 10;

/// Errors surfaced by slot acquisition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LimitError {
    /// The configured acquisition timeout elapsed before a slot freed up.
    /// The caller must treat the acquisition as denied.
    #[error("timed out waiting {waited:?} for a concurrency slot")]
    Timeout { waited: Duration },
}

/// A held concurrency slot.
///
/// Dropping the slot releases it and wakes the next FIFO waiter, so the
/// active count can never exceed the configured limit.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

/// Counting semaphore bounding how many steps execute at once.
///
/// # Example
///
/// ```
/// use taxis::executor::SlotPool;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = SlotPool::new(2, None);
/// let a = pool.acquire().await.unwrap();
/// let b = pool.acquire().await.unwrap();
/// assert_eq!(pool.in_use(), 2);
///
/// drop(a);
/// assert_eq!(pool.in_use(), 1);
/// # drop(b);
/// # }
/// ```
#[derive(Debug)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    limit: usize,
    timeout: Option<Duration>,
}

impl SlotPool {
    /// Creates a pool with the given slot limit.
    ///
    /// `timeout` bounds each individual acquisition; `None` waits
    /// indefinitely.
    pub fn new(limit: usize, timeout: Option<Duration>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            timeout,
        }
    }

    /// Returns the configured slot limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns how many slots are currently held.
    pub fn in_use(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Acquires a slot, suspending while the pool is at its limit.
    ///
    /// Waiters are served in FIFO order. With a configured timeout, an
    /// acquisition that waits longer fails with [`LimitError::Timeout`].
    pub async fn acquire(&self) -> Result<Slot, LimitError> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();

        let permit = match self.timeout {
            Some(waited) => tokio::time::timeout(waited, acquire)
                .await
                .map_err(|_| LimitError::Timeout { waited })?,
            None => acquire.await,
        };

        // The semaphore is never closed for the lifetime of the pool.
        let permit = permit.expect("BUG: slot pool semaphore closed");
        Ok(Slot { _permit: permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grants_immediately_under_limit() {
        let pool = SlotPool::new(3, None);
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 2);
        assert_eq!(pool.limit(), 3);
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let pool = Arc::new(SlotPool::new(1, None));
        let first = pool.acquire().await.unwrap();

        let contender = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        // The contender cannot get the slot while it is held.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_produces_distinguishable_error() {
        let pool = Arc::new(SlotPool::new(1, Some(Duration::from_millis(50))));
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(
            err,
            LimitError::Timeout {
                waited: Duration::from_millis(50)
            }
        );
        // The failed waiter did not leak a slot.
        assert_eq!(pool.in_use(), 1);
    }

    #[tokio::test]
    async fn test_active_count_never_exceeds_limit() {
        let pool = Arc::new(SlotPool::new(2, None));
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                let _slot = pool.acquire().await.unwrap();
                assert!(pool.in_use() <= pool.limit());
                tokio::task::yield_now().await;
                assert!(pool.in_use() <= pool.limit());
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(pool.in_use(), 0);
    }
}
