//! In-memory storage fakes for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use turnstile::Watermark;

use super::{ListingStore, SubscriberStore};
use crate::types::{ListingFilter, ListingRecord, Subscriber, SubscriberId, WorkKey};

/// In-memory [`ListingStore`] with the same dedup-by-url semantics as the
/// Postgres implementation.
#[derive(Default)]
pub struct MemoryListingStore {
    listings: Mutex<Vec<ListingRecord>>,
    boundaries: Mutex<HashMap<String, Watermark>>,
    fail_appends: std::sync::atomic::AtomicBool,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail, for persistence-error tests.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<ListingRecord> {
        self.listings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.listings.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn boundary(&self, key: &WorkKey) -> Option<Watermark> {
        self.boundaries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key.to_string())
            .cloned()
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn append_records(&self, records: &[ListingRecord]) -> anyhow::Result<usize> {
        if self.fail_appends.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("simulated persistence failure");
        }
        let mut listings = self.listings.lock().unwrap_or_else(|e| e.into_inner());
        let mut inserted = 0;
        for record in records {
            if listings
                .iter()
                .any(|known| known.external_url == record.external_url)
            {
                continue;
            }
            listings.push(record.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn read_boundary(&self, key: &WorkKey) -> anyhow::Result<Option<Watermark>> {
        Ok(self
            .boundaries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key.to_string())
            .cloned())
    }

    async fn write_boundary(&self, key: &WorkKey, mark: &Watermark) -> anyhow::Result<()> {
        self.boundaries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), mark.clone());
        Ok(())
    }

    async fn find_matching(
        &self,
        filter: &ListingFilter,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ListingRecord>> {
        let mut matching: Vec<ListingRecord> = self
            .listings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|record| record.posted_at >= since && filter.matches(record))
            .cloned()
            .collect();
        matching.sort_by_key(|record| record.posted_at);
        Ok(matching)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut listings = self.listings.lock().unwrap_or_else(|e| e.into_inner());
        let before = listings.len();
        listings.retain(|record| record.posted_at >= cutoff);
        Ok((before - listings.len()) as u64)
    }
}

/// In-memory [`SubscriberStore`].
#[derive(Default)]
pub struct MemorySubscriberStore {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    watch_states: Mutex<HashMap<SubscriberId, Watermark>>,
}

impl MemorySubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subscriber.id.clone(), subscriber);
    }

    pub fn watch_state(&self, id: &SubscriberId) -> Option<Watermark> {
        self.watch_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl SubscriberStore for MemorySubscriberStore {
    async fn find(&self, id: &SubscriberId) -> anyhow::Result<Option<Subscriber>> {
        Ok(self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn active_subscribers(&self) -> anyhow::Result<Vec<Subscriber>> {
        let mut active: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|subscriber| subscriber.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(active)
    }

    async fn read_watch_state(&self, id: &SubscriberId) -> anyhow::Result<Option<Watermark>> {
        Ok(self
            .watch_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn write_watch_state(&self, id: &SubscriberId, mark: &Watermark) -> anyhow::Result<()> {
        self.watch_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), mark.clone());
        Ok(())
    }
}
