//! The notification job handler: the crawl consumer's shape applied per
//! subscriber.
//!
//! Same lock discipline, same heartbeat contract, same watermark staleness
//! rules, but the watch state advances with a tie-set merge rather than a
//! plain replace, so repeated no-op runs over an unchanged feed never lose
//! tie-breaking history.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use turnstile::{DistributedLock, LockError, Watermark, WatermarkTracker};

use crate::consume::{ConsumerSettings, JobState};
use crate::error::JobError;
use crate::storage::{ListingStore, SubscriberStore};
use crate::transport::{Heartbeat, HeartbeatPulse, NotifyJob};
use crate::types::{notify_lock_key, ListingRecord, Subscriber, SubscriberId};

/// Outbound delivery seam; templating and channel mechanics live behind it.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(
        &self,
        subscriber: &Subscriber,
        records: &[ListingRecord],
    ) -> anyhow::Result<()>;
}

/// Terminal result of a successfully handled notification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// `delivered` fresh records went out (possibly zero).
    Delivered { delivered: usize },
    /// Another worker holds this subscriber; nothing was done.
    Blocked,
    /// The subscriber exists but has monitoring switched off.
    Inactive,
}

pub struct NotificationConsumer {
    lock: DistributedLock,
    subscribers: Arc<dyn SubscriberStore>,
    listings: Arc<dyn ListingStore>,
    channel: Arc<dyn NotificationChannel>,
    tracker: WatermarkTracker,
    settings: ConsumerSettings,
}

impl NotificationConsumer {
    pub fn new(
        lock: DistributedLock,
        subscribers: Arc<dyn SubscriberStore>,
        listings: Arc<dyn ListingStore>,
        channel: Arc<dyn NotificationChannel>,
        tracker: WatermarkTracker,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            lock,
            subscribers,
            listings,
            channel,
            tracker,
            settings,
        }
    }

    pub async fn handle(
        &self,
        job: &NotifyJob,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Result<NotifyOutcome, JobError> {
        let id = &job.subscriber_id;
        debug!(subscriber = %id, state = ?JobState::Received, "notify job received");

        let guard = match self
            .lock
            .acquire(&notify_lock_key(id), self.settings.lock_ttl)
            .await
        {
            Ok(guard) => guard,
            Err(LockError::AlreadyHeld { .. }) => {
                info!(subscriber = %id, state = ?JobState::Blocked, "subscriber locked elsewhere, skipping");
                return Ok(NotifyOutcome::Blocked);
            }
            Err(err) => return Err(JobError::LockStore(err)),
        };

        let result = self.run_locked(id, heartbeat).await;

        if let Err(err) = self.lock.release(guard).await {
            warn!(subscriber = %id, error = %err, "lock release failed, ttl will reclaim");
        }

        match &result {
            Ok(outcome) => {
                info!(subscriber = %id, ?outcome, state = ?JobState::Done, "notify complete")
            }
            Err(err) => {
                warn!(subscriber = %id, error = %err, state = ?JobState::Failed, "notify failed")
            }
        }
        result
    }

    async fn run_locked(
        &self,
        id: &SubscriberId,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Result<NotifyOutcome, JobError> {
        let subscriber = self
            .subscribers
            .find(id)
            .await
            .map_err(JobError::Persistence)?
            .ok_or_else(|| JobError::UnknownSubscriber(id.clone()))?;

        if !subscriber.active {
            return Ok(NotifyOutcome::Inactive);
        }

        let _pulse = HeartbeatPulse::start(heartbeat, self.settings.heartbeat_interval);

        let state = self
            .tracker
            .boundary_for(id.as_str())
            .await
            .map_err(JobError::Persistence)?;

        // cold start: anchor at the current instant rather than replaying
        // history at a new or long-idle subscriber
        let Some(since) = state.last_seen_at else {
            let initial = Watermark {
                last_seen_at: Some(Utc::now()),
                ids_at_last_seen: Vec::new(),
            };
            self.tracker
                .commit(id.as_str(), &initial)
                .await
                .map_err(JobError::Persistence)?;
            debug!(subscriber = %id, "watch state initialized");
            return Ok(NotifyOutcome::Delivered { delivered: 0 });
        };

        let candidates = self
            .listings
            .find_matching(&subscriber.filter, since)
            .await
            .map_err(JobError::Persistence)?;

        // on a timestamp tie, ids already notified are excluded
        let fresh: Vec<ListingRecord> = candidates
            .into_iter()
            .filter(|record| {
                !(record.posted_at == since
                    && state
                        .ids_at_last_seen
                        .iter()
                        .any(|seen| seen == &record.external_url))
            })
            .collect();

        if fresh.is_empty() {
            return Ok(NotifyOutcome::Delivered { delivered: 0 });
        }

        self.channel
            .deliver(&subscriber, &fresh)
            .await
            .map_err(JobError::Delivery)?;

        // merge keeps prior tie ids when the newest timestamp is unchanged
        let advanced = match Watermark::from_records(&fresh) {
            Some(next) => state.merged(&next),
            None => state,
        };
        self.tracker
            .commit(id.as_str(), &advanced)
            .await
            .map_err(JobError::Persistence)?;

        Ok(NotifyOutcome::Delivered {
            delivered: fresh.len(),
        })
    }
}
