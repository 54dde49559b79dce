//! Persistence seams.
//!
//! The crawl and notify flows touch storage only through these traits; the
//! server crate binds them to Postgres and the fakes in [`memory`] back the
//! test suites. Boundary persistence is exposed both directly
//! (`read_boundary`/`write_boundary`) and as [`WatermarkStore`] adapters so
//! the shared [`turnstile::WatermarkTracker`] can drive both flows.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use turnstile::{Watermark, WatermarkStore};

use crate::types::{ListingFilter, ListingRecord, Subscriber, SubscriberId, WorkKey};

/// Listing persistence.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Append records, skipping any whose `external_url` is already stored.
    ///
    /// Returns the number actually inserted. Append-only: nothing here
    /// updates or deletes existing rows.
    async fn append_records(&self, records: &[ListingRecord]) -> anyhow::Result<usize>;

    /// The stored crawl boundary for a key, if one exists.
    async fn read_boundary(&self, key: &WorkKey) -> anyhow::Result<Option<Watermark>>;

    /// Replace the stored crawl boundary for a key.
    async fn write_boundary(&self, key: &WorkKey, mark: &Watermark) -> anyhow::Result<()>;

    /// Records matching a subscriber filter, posted at or after `since`,
    /// oldest first.
    async fn find_matching(
        &self,
        filter: &ListingFilter,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ListingRecord>>;

    /// Retention sweep: drop records posted before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// Subscriber persistence.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn find(&self, id: &SubscriberId) -> anyhow::Result<Option<Subscriber>>;

    /// Every subscriber with monitoring switched on.
    async fn active_subscribers(&self) -> anyhow::Result<Vec<Subscriber>>;

    /// The subscriber's notification watch state, if any.
    async fn read_watch_state(&self, id: &SubscriberId) -> anyhow::Result<Option<Watermark>>;

    /// Replace the subscriber's notification watch state.
    async fn write_watch_state(&self, id: &SubscriberId, mark: &Watermark) -> anyhow::Result<()>;
}

/// [`WatermarkStore`] over crawl boundaries, keyed by the canonical
/// `source:region` form of [`WorkKey`].
pub struct CrawlBoundaryStore {
    listings: Arc<dyn ListingStore>,
}

impl CrawlBoundaryStore {
    pub fn new(listings: Arc<dyn ListingStore>) -> Self {
        Self { listings }
    }

    fn parse_key(key: &str) -> anyhow::Result<WorkKey> {
        WorkKey::parse(key).ok_or_else(|| anyhow::anyhow!("malformed work key: {key}"))
    }
}

#[async_trait]
impl WatermarkStore for CrawlBoundaryStore {
    async fn read(&self, key: &str) -> anyhow::Result<Option<Watermark>> {
        self.listings.read_boundary(&Self::parse_key(key)?).await
    }

    async fn write(&self, key: &str, mark: &Watermark) -> anyhow::Result<()> {
        self.listings
            .write_boundary(&Self::parse_key(key)?, mark)
            .await
    }
}

/// [`WatermarkStore`] over subscriber watch state, keyed by subscriber id.
pub struct WatchStateStore {
    subscribers: Arc<dyn SubscriberStore>,
}

impl WatchStateStore {
    pub fn new(subscribers: Arc<dyn SubscriberStore>) -> Self {
        Self { subscribers }
    }
}

#[async_trait]
impl WatermarkStore for WatchStateStore {
    async fn read(&self, key: &str) -> anyhow::Result<Option<Watermark>> {
        self.subscribers
            .read_watch_state(&SubscriberId(key.to_owned()))
            .await
    }

    async fn write(&self, key: &str, mark: &Watermark) -> anyhow::Result<()> {
        self.subscribers
            .write_watch_state(&SubscriberId(key.to_owned()), mark)
            .await
    }
}
