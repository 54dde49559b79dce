//! Distributed per-key mutual exclusion with ttl and optional auto-extension.
//!
//! Acquisition is one atomic create-if-absent with expiry against the shared
//! store, so at most one holder exists per key across every process that
//! shares the store. The ttl is the crash backstop: a holder that dies
//! without releasing frees the key once the ttl elapses. Work that can
//! outlive any fixed ttl acquires with an extension interval instead, and a
//! background task owned by the guard refreshes the ttl until release.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::LockError;
use crate::kv::KvStore;

/// Per-key mutual exclusion over a shared [`KvStore`].
#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    prefix: String,
}

/// Proof of lock ownership for one key.
///
/// Holds the handle of the extension task, if any; release cancels it.
/// Dropping a guard without releasing only stops the extender; the store
/// entry then frees itself via ttl.
pub struct LockGuard {
    key: String,
    store_key: String,
    extender: Option<JoinHandle<()>>,
}

impl LockGuard {
    /// The caller-facing key this guard protects.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the background extension task is still running.
    pub fn is_extending(&self) -> bool {
        self.extender.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop_extender(&mut self) {
        if let Some(handle) = self.extender.take() {
            handle.abort();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop_extender();
    }
}

impl DistributedLock {
    /// Create a lock namespace. All store keys are `{prefix}_{key}`.
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key)
    }

    /// Try to acquire the lock for `key`, holding it for at most `ttl`.
    ///
    /// Non-blocking: returns [`LockError::AlreadyHeld`] immediately when
    /// another holder owns the key. Size `ttl` at or above the worst-case
    /// work duration, or use [`acquire_extending`](Self::acquire_extending).
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<LockGuard, LockError> {
        self.acquire_inner(key, ttl, None).await
    }

    /// Acquire with a background task refreshing the ttl every
    /// `extend_interval` until release.
    ///
    /// The extension task self-cancels if a refresh finds the key gone
    /// (crash cleanup, manual release, or ttl miscalibration), so a stale
    /// extender can never re-arm a lock nobody holds.
    pub async fn acquire_extending(
        &self,
        key: &str,
        ttl: Duration,
        extend_interval: Duration,
    ) -> Result<LockGuard, LockError> {
        self.acquire_inner(key, ttl, Some(extend_interval)).await
    }

    async fn acquire_inner(
        &self,
        key: &str,
        ttl: Duration,
        extend_interval: Option<Duration>,
    ) -> Result<LockGuard, LockError> {
        let store_key = self.store_key(key);
        let created = self.kv.set_nx_ttl(&store_key, "held", ttl).await?;
        if !created {
            return Err(LockError::AlreadyHeld {
                key: key.to_owned(),
            });
        }
        debug!(key, ttl_secs = ttl.as_secs(), "lock acquired");

        let extender = extend_interval.map(|every| {
            let kv = Arc::clone(&self.kv);
            let store_key = store_key.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(every);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // interval fires immediately; the lock was just created
                tick.tick().await;
                loop {
                    tick.tick().await;
                    match kv.expire(&store_key, ttl).await {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(key = %store_key, "lock entry gone, stopping extender");
                            break;
                        }
                        // transient refresh failure: the ttl still bounds
                        // the hold, keep trying
                        Err(err) => {
                            warn!(key = %store_key, error = %err, "lock extension failed");
                        }
                    }
                }
            })
        });

        Ok(LockGuard {
            key: key.to_owned(),
            store_key,
            extender,
        })
    }

    /// Non-mutating check: is the key currently held by anyone?
    pub async fn is_held(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.kv.get(&self.store_key(key)).await?.is_some())
    }

    /// Release a held lock.
    ///
    /// Idempotent: cancels any pending extension task and deletes the key
    /// regardless of its current state.
    pub async fn release(&self, mut guard: LockGuard) -> Result<(), LockError> {
        guard.stop_extender();
        self.kv.del(&guard.store_key).await?;
        debug!(key = %guard.key, "lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKv;

    fn lock() -> DistributedLock {
        DistributedLock::new(Arc::new(MemoryKv::new()), "app")
    }

    #[tokio::test]
    async fn test_mutual_exclusion_one_winner() {
        let lock = Arc::new(lock());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(tokio::spawn(async move {
                lock.acquire("k", Duration::from_secs(60)).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_guard) => wins += 1,
                Err(LockError::AlreadyHeld { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_release_frees_the_key() {
        let lock = lock();
        let guard = lock.acquire("k", Duration::from_secs(60)).await.unwrap();
        assert!(lock.is_held("k").await.unwrap());

        lock.release(guard).await.unwrap();
        assert!(!lock.is_held("k").await.unwrap());
        let reacquired = lock.acquire("k", Duration::from_secs(60)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_recovers_a_crashed_holder() {
        let lock = lock();
        let guard = lock.acquire("k", Duration::from_secs(30)).await.unwrap();
        // simulate a crash: the guard is forgotten, never released
        std::mem::forget(guard);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(lock
            .acquire("k", Duration::from_secs(30))
            .await
            .err()
            .unwrap()
            .is_already_held());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(lock.acquire("k", Duration::from_secs(30)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extension_outlives_the_base_ttl() {
        let lock = lock();
        let guard = lock
            .acquire_extending("k", Duration::from_secs(10), Duration::from_secs(3))
            .await
            .unwrap();
        // let the extender task register its interval before moving the clock
        tokio::task::yield_now().await;

        for _ in 0..20 {
            tokio::time::advance(Duration::from_secs(3)).await;
            tokio::task::yield_now().await;
        }

        // 60s elapsed against a 10s ttl; the extender kept it alive
        assert!(lock.is_held("k").await.unwrap());
        lock.release(guard).await.unwrap();
        assert!(!lock.is_held("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extender_self_cancels_when_key_vanishes() {
        let kv = Arc::new(MemoryKv::new());
        let lock = DistributedLock::new(kv.clone(), "app");
        let guard = lock
            .acquire_extending("k", Duration::from_secs(10), Duration::from_secs(3))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(guard.is_extending());

        // someone else deletes the entry out from under the holder
        kv.del("app_k").await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert!(!guard.is_extending());
        assert!(!lock.is_held("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_after_external_delete() {
        let kv = Arc::new(MemoryKv::new());
        let lock = DistributedLock::new(kv.clone(), "app");
        let guard = lock.acquire("k", Duration::from_secs(60)).await.unwrap();

        kv.del("app_k").await.unwrap();
        assert!(lock.release(guard).await.is_ok());
    }
}
