//! Borrow/return pool of scarce shared resources.
//!
//! The pool is a FIFO list in the shared store; items are values, encoded as
//! JSON, and membership is presence in the list. `acquire` lends the head
//! out, `add` returns an item to circulation, `remove` evicts by value.
//! The total set (in pool + checked out) only changes through add/remove,
//! never through acquire alone, so callers must return every borrowed item
//! from a guaranteed-cleanup path unless they are evicting it.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::PoolError;
use crate::kv::KvStore;

/// How long and how often `acquire` retries an empty pool.
///
/// Bounded: after `attempts` misses the caller gets
/// [`PoolError::Unavailable`] instead of waiting forever.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(1),
        }
    }
}

/// FIFO pool of `T` values over a shared [`KvStore`] list.
pub struct ResourcePool<T> {
    kv: Arc<dyn KvStore>,
    key: String,
    retry: RetryPolicy,
    _item: PhantomData<fn() -> T>,
}

impl<T> ResourcePool<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            retry: RetryPolicy::default(),
            _item: PhantomData,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Append an item to the tail, returning it to circulation.
    pub async fn add(&self, item: &T) -> Result<(), PoolError> {
        let raw = serde_json::to_string(item)?;
        self.kv.rpush(&self.key, &raw).await?;
        Ok(())
    }

    /// Pop the head if the pool is non-empty, without retrying.
    pub async fn try_acquire(&self) -> Result<Option<T>, PoolError> {
        match self.kv.lpop(&self.key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Pop the head, retrying an empty pool on a fixed interval up to the
    /// bounded attempt count.
    pub async fn acquire(&self) -> Result<T, PoolError> {
        for attempt in 1..=self.retry.attempts {
            if let Some(item) = self.try_acquire().await? {
                return Ok(item);
            }
            debug!(
                pool = %self.key,
                attempt,
                attempts = self.retry.attempts,
                "pool empty, waiting"
            );
            if attempt < self.retry.attempts {
                tokio::time::sleep(self.retry.interval).await;
            }
        }
        Err(PoolError::Unavailable {
            key: self.key.clone(),
            attempts: self.retry.attempts,
        })
    }

    /// Evict every list entry matching `item` by value.
    ///
    /// Returns the number of entries removed.
    pub async fn remove(&self, item: &T) -> Result<u64, PoolError> {
        let raw = serde_json::to_string(item)?;
        Ok(self.kv.lrem(&self.key, &raw).await?)
    }

    /// Snapshot of the items currently in the pool (not checked out).
    pub async fn items(&self) -> Result<Vec<T>, PoolError> {
        self.kv
            .lrange(&self.key)
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(PoolError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKv;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Credential {
        host: String,
        port: u16,
    }

    fn cred(host: &str) -> Credential {
        Credential {
            host: host.into(),
            port: 8080,
        }
    }

    fn pool() -> ResourcePool<Credential> {
        ResourcePool::new(Arc::new(MemoryKv::new()), "proxy")
    }

    #[tokio::test]
    async fn test_acquire_is_fifo() {
        let pool = pool();
        pool.add(&cred("a")).await.unwrap();
        pool.add(&cred("b")).await.unwrap();

        assert_eq!(pool.acquire().await.unwrap(), cred("a"));
        assert_eq!(pool.acquire().await.unwrap(), cred("b"));
    }

    #[tokio::test]
    async fn test_conservation_under_add_and_acquire() {
        let pool = pool();
        for host in ["a", "b", "c"] {
            pool.add(&cred(host)).await.unwrap();
        }

        let borrowed_one = pool.acquire().await.unwrap();
        let borrowed_two = pool.acquire().await.unwrap();
        assert_eq!(pool.items().await.unwrap().len(), 1);

        pool.add(&borrowed_one).await.unwrap();
        pool.add(&borrowed_two).await.unwrap();
        // available + checked out never changed: back to the full set
        assert_eq!(pool.items().await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_returns_unavailable_after_bounded_retries() {
        let pool = pool().with_retry(RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(100),
        });

        let started = tokio::time::Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(err.is_unavailable());
        // two sleeps between three attempts, never an unbounded spin
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_picks_up_item_added_mid_retry() {
        let pool = Arc::new(pool().with_retry(RetryPolicy {
            attempts: 5,
            interval: Duration::from_millis(100),
        }));

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        pool.add(&cred("late")).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), cred("late"));
    }

    #[tokio::test]
    async fn test_remove_evicts_by_value() {
        let pool = pool();
        pool.add(&cred("a")).await.unwrap();
        pool.add(&cred("b")).await.unwrap();

        assert_eq!(pool.remove(&cred("a")).await.unwrap(), 1);
        assert_eq!(pool.items().await.unwrap(), vec![cred("b")]);
        assert_eq!(pool.remove(&cred("missing")).await.unwrap(), 0);
    }
}
