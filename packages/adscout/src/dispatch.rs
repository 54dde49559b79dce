//! Scheduled job dispatch.
//!
//! Runs on a fixed cadence, enumerates every configured work key, and
//! publishes one queue message per key that is not currently locked. The
//! lock check is a non-mutating peek: a key already being crawled would
//! only produce a job the consumer immediately rejects, so it is skipped
//! at the source instead of flooding the queue. Publishing is the only
//! side effect here; lock, pool, and watermark state are untouched.

use std::sync::Arc;

use tracing::{debug, info};
use turnstile::DistributedLock;

use crate::storage::SubscriberStore;
use crate::transport::{CrawlJob, JobTransport, NotifyJob};
use crate::types::{notify_lock_key, RegionId, SourceId, WorkKey};

/// What one dispatch tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: usize,
    pub skipped: usize,
}

/// Emits crawl jobs for the sources × regions cross product.
pub struct JobDispatcher {
    lock: DistributedLock,
    transport: Arc<dyn JobTransport>,
    keys: Vec<WorkKey>,
}

impl JobDispatcher {
    pub fn new(
        lock: DistributedLock,
        transport: Arc<dyn JobTransport>,
        sources: &[SourceId],
        regions: &[RegionId],
    ) -> Self {
        let keys = sources
            .iter()
            .flat_map(|source| {
                regions
                    .iter()
                    .map(move |region| WorkKey::new(source.clone(), region.clone()))
            })
            .collect();
        Self {
            lock,
            transport,
            keys,
        }
    }

    pub fn keys(&self) -> &[WorkKey] {
        &self.keys
    }

    pub async fn dispatch(&self) -> anyhow::Result<DispatchStats> {
        let mut stats = DispatchStats::default();
        for key in &self.keys {
            if self.lock.is_held(&key.lock_key()).await? {
                debug!(%key, "crawl in flight, skipping enqueue");
                stats.skipped += 1;
                continue;
            }
            self.transport.publish_crawl(&CrawlJob::for_key(key)).await?;
            stats.enqueued += 1;
        }
        info!(
            enqueued = stats.enqueued,
            skipped = stats.skipped,
            "crawl dispatch tick"
        );
        Ok(stats)
    }
}

/// Emits notification jobs for every active subscriber.
pub struct NotificationDispatcher {
    lock: DistributedLock,
    transport: Arc<dyn JobTransport>,
    subscribers: Arc<dyn SubscriberStore>,
}

impl NotificationDispatcher {
    pub fn new(
        lock: DistributedLock,
        transport: Arc<dyn JobTransport>,
        subscribers: Arc<dyn SubscriberStore>,
    ) -> Self {
        Self {
            lock,
            transport,
            subscribers,
        }
    }

    pub async fn dispatch(&self) -> anyhow::Result<DispatchStats> {
        let mut stats = DispatchStats::default();
        for subscriber in self.subscribers.active_subscribers().await? {
            if self.lock.is_held(&notify_lock_key(&subscriber.id)).await? {
                debug!(subscriber = %subscriber.id, "notification in flight, skipping enqueue");
                stats.skipped += 1;
                continue;
            }
            self.transport
                .publish_notify(&NotifyJob {
                    subscriber_id: subscriber.id,
                })
                .await?;
            stats.enqueued += 1;
        }
        info!(
            enqueued = stats.enqueued,
            skipped = stats.skipped,
            "notify dispatch tick"
        );
        Ok(stats)
    }
}
