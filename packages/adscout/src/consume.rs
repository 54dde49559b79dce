//! The crawl job handler: a small state machine composing the lock, the
//! proxy pool, the watermark tracker, and the external provider.
//!
//! ```text
//! Received ──► LockAcquired ──► Running ──► Done
//!     │              │             │
//!     ▼              ▼             ▼
//!  Blocked        Failed        Failed
//! ```
//!
//! `Blocked` is a quiet terminal: the key is being crawled elsewhere and the
//! next dispatch tick will try again. `Failed` surfaces as [`JobError`] to
//! the queue transport, whose redelivery is the only retry. The lock and a
//! borrowed proxy are released on every exit path after acquisition; if the
//! process dies first, the lock ttl and the broker's delivery timeout are
//! the backstops.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use turnstile::{DistributedLock, LockError, WatermarkTracker};

use crate::error::JobError;
use crate::provider::{ProviderError, ProviderRegistry};
use crate::proxy::ProxyPool;
use crate::storage::ListingStore;
use crate::transport::{CrawlJob, Heartbeat, HeartbeatPulse};
use crate::types::WorkKey;

/// Handler phases, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    LockAcquired,
    Running,
    Done,
    Blocked,
    Failed,
}

/// Terminal result of a successfully handled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The crawl ran; `inserted` new records were persisted.
    Completed { inserted: usize },
    /// Another worker holds the key; nothing was done.
    Blocked,
}

/// Tunables for job handling.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Lock ttl; size at or above the worst-case crawl duration.
    pub lock_ttl: Duration,
    /// When set, the lock is auto-extended on this interval instead of
    /// relying on the ttl alone.
    pub lock_extend_interval: Option<Duration>,
    /// Cadence of broker liveness beats while a job runs.
    pub heartbeat_interval: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(300),
            lock_extend_interval: None,
            heartbeat_interval: Duration::from_millis(1500),
        }
    }
}

/// Handles one crawl job at a time; clones share nothing mutable, so one
/// instance serves any number of concurrent handler tasks.
pub struct JobConsumer {
    lock: DistributedLock,
    proxies: ProxyPool,
    tracker: WatermarkTracker,
    providers: Arc<ProviderRegistry>,
    listings: Arc<dyn ListingStore>,
    settings: ConsumerSettings,
}

impl JobConsumer {
    pub fn new(
        lock: DistributedLock,
        proxies: ProxyPool,
        tracker: WatermarkTracker,
        providers: Arc<ProviderRegistry>,
        listings: Arc<dyn ListingStore>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            lock,
            proxies,
            tracker,
            providers,
            listings,
            settings,
        }
    }

    /// Drive one job from `Received` to a terminal state.
    pub async fn handle(
        &self,
        job: &CrawlJob,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Result<CrawlOutcome, JobError> {
        let key = job.work_key();
        debug!(%key, state = ?JobState::Received, "crawl job received");

        let guard = match self
            .acquire_lock(&key.lock_key())
            .await
        {
            Ok(guard) => guard,
            Err(LockError::AlreadyHeld { .. }) => {
                info!(%key, state = ?JobState::Blocked, "key locked elsewhere, skipping");
                return Ok(CrawlOutcome::Blocked);
            }
            Err(err) => return Err(JobError::LockStore(err)),
        };
        debug!(%key, state = ?JobState::LockAcquired, "lock acquired");

        let result = self.run_locked(&key, heartbeat).await;

        // release runs on every exit path; ttl expiry covers a crash before
        // this point
        if let Err(err) = self.lock.release(guard).await {
            warn!(%key, error = %err, "lock release failed, ttl will reclaim");
        }

        match result {
            Ok(inserted) => {
                info!(%key, inserted, state = ?JobState::Done, "crawl complete");
                Ok(CrawlOutcome::Completed { inserted })
            }
            Err(err) => {
                warn!(%key, error = %err, state = ?JobState::Failed, "crawl failed");
                Err(err)
            }
        }
    }

    async fn acquire_lock(&self, lock_key: &str) -> Result<turnstile::LockGuard, LockError> {
        match self.settings.lock_extend_interval {
            Some(every) => {
                self.lock
                    .acquire_extending(lock_key, self.settings.lock_ttl, every)
                    .await
            }
            None => self.lock.acquire(lock_key, self.settings.lock_ttl).await,
        }
    }

    /// Everything between `LockAcquired` and the terminal states.
    async fn run_locked(
        &self,
        key: &WorkKey,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Result<usize, JobError> {
        let provider = self.providers.get(&key.source)?;

        let boundary = self
            .tracker
            .boundary_for(&key.to_string())
            .await
            .map_err(JobError::Persistence)?;

        let proxy = if provider.requires_proxy() {
            match self.proxies.acquire().await {
                Ok(proxy) => Some(proxy),
                Err(err) => return Err(JobError::ProxyUnavailable(err)),
            }
        } else {
            None
        };

        debug!(%key, cold_start = boundary.is_empty(), state = ?JobState::Running, "crawl running");

        // the pulse covers exactly the provider call, the long-running part
        let found = {
            let _pulse = HeartbeatPulse::start(
                Arc::clone(&heartbeat),
                self.settings.heartbeat_interval,
            );
            provider
                .find(key, &boundary, proxy.as_ref(), heartbeat)
                .await
        };

        // proxy goes back to circulation on every path; a reported ban
        // evicts instead
        if let Some(proxy) = proxy {
            let banned = matches!(&found, Err(ProviderError::ProxyBanned));
            self.proxies.finish(proxy, banned).await;
        }

        let findings = found.map_err(|source| JobError::Provider {
            key: key.clone(),
            source,
        })?;

        let inserted = self
            .listings
            .append_records(&findings.records)
            .await
            .map_err(JobError::Persistence)?;

        // watermark moves only after the append succeeded
        match findings.boundary_hint {
            Some(hint) => self
                .tracker
                .commit(&key.to_string(), &hint)
                .await
                .map_err(JobError::Persistence)?,
            None => {
                self.tracker
                    .advance(&key.to_string(), &findings.records)
                    .await
                    .map_err(JobError::Persistence)?;
            }
        }

        Ok(inserted)
    }
}
