//! Incremental-crawl boundary tracking.
//!
//! A watermark records how far ingestion of an unbounded, continuously
//! appending feed has progressed for one key: the newest timestamp seen and
//! every id sharing that exact instant (the tie set). Keeping the whole tie
//! set means a feed that posts several records in the same second is neither
//! reprocessed nor skipped on the next pass.
//!
//! A watermark older than the staleness threshold reads as empty. That
//! bounds how far back a cold consumer pages, and it breaks the "nothing
//! new" loop an idle feed would otherwise cause once activity resumes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Anything that can be positioned against a watermark.
pub trait Watermarked {
    /// Stable identity of the record within its feed.
    fn mark_id(&self) -> &str;
    /// The instant the record was published.
    fn marked_at(&self) -> DateTime<Utc>;
}

/// The boundary for one key: newest seen instant plus its tie set.
///
/// An empty watermark (no `last_seen_at`) is a cold start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub last_seen_at: Option<DateTime<Utc>>,
    pub ids_at_last_seen: Vec<String>,
}

impl Watermark {
    pub fn is_empty(&self) -> bool {
        self.last_seen_at.is_none()
    }

    /// True when the mark is older than `staleness`.
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.last_seen_at
            .is_some_and(|seen| now - seen > staleness)
    }

    /// Pagination stop rule for newest-first feeds: stop once a record's id
    /// is in the tie set (exact repeat of a previously seen instant) or the
    /// record is older than `now - staleness`.
    pub fn cuts_off(
        &self,
        id: &str,
        seen_at: DateTime<Utc>,
        now: DateTime<Utc>,
        staleness: Duration,
    ) -> bool {
        if self.ids_at_last_seen.iter().any(|known| known == id) {
            return true;
        }
        seen_at < now - staleness
    }

    /// The mark describing a batch of newly ingested records: the maximum
    /// timestamp and every id sharing it. `None` for an empty batch.
    pub fn from_records<R: Watermarked>(records: &[R]) -> Option<Self> {
        let newest = records.iter().map(|r| r.marked_at()).max()?;
        let ids = records
            .iter()
            .filter(|r| r.marked_at() == newest)
            .map(|r| r.mark_id().to_owned())
            .collect();
        Some(Self {
            last_seen_at: Some(newest),
            ids_at_last_seen: ids,
        })
    }

    /// Combine with a newer mark.
    ///
    /// When both marks sit on the same instant the tie sets are unioned, so
    /// repeated runs against an unchanged feed never lose tie-breaking
    /// history. Otherwise the newer mark wins outright.
    pub fn merged(&self, newer: &Watermark) -> Watermark {
        if !newer.is_empty() && self.last_seen_at == newer.last_seen_at {
            let mut ids = self.ids_at_last_seen.clone();
            for id in &newer.ids_at_last_seen {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            return Watermark {
                last_seen_at: self.last_seen_at,
                ids_at_last_seen: ids,
            };
        }
        newer.clone()
    }
}

/// Persistence seam for watermarks, keyed by an opaque string.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn read(&self, key: &str) -> anyhow::Result<Option<Watermark>>;
    async fn write(&self, key: &str, mark: &Watermark) -> anyhow::Result<()>;
}

/// Computes and advances the incremental-crawl boundary per key.
#[derive(Clone)]
pub struct WatermarkTracker {
    store: Arc<dyn WatermarkStore>,
    staleness: Duration,
}

impl WatermarkTracker {
    pub fn new(store: Arc<dyn WatermarkStore>, staleness: Duration) -> Self {
        Self { store, staleness }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// The boundary to crawl from: the stored mark, or an empty one when
    /// nothing is stored or the stored mark has gone stale.
    pub async fn boundary_for(&self, key: &str) -> anyhow::Result<Watermark> {
        let mark = self.store.read(key).await?.unwrap_or_default();
        if mark.is_stale(Utc::now(), self.staleness) {
            debug!(key, last_seen_at = ?mark.last_seen_at, "watermark stale, treating as cold start");
            return Ok(Watermark::default());
        }
        Ok(mark)
    }

    /// Persist an explicitly computed mark.
    pub async fn commit(&self, key: &str, mark: &Watermark) -> anyhow::Result<()> {
        self.store.write(key, mark).await?;
        debug!(key, last_seen_at = ?mark.last_seen_at, "watermark committed");
        Ok(())
    }

    /// Persist the boundary implied by newly ingested records.
    ///
    /// A run that found nothing leaves the stored mark untouched and
    /// returns `None`.
    pub async fn advance<R: Watermarked + Sync>(
        &self,
        key: &str,
        records: &[R],
    ) -> anyhow::Result<Option<Watermark>> {
        let Some(mark) = Watermark::from_records(records) else {
            return Ok(None);
        };
        self.store.write(key, &mark).await?;
        debug!(
            key,
            last_seen_at = ?mark.last_seen_at,
            tie_set = mark.ids_at_last_seen.len(),
            "watermark advanced"
        );
        Ok(Some(mark))
    }
}

/// In-memory [`WatermarkStore`] for tests.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    marks: std::sync::Mutex<std::collections::HashMap<String, Watermark>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn read(&self, key: &str) -> anyhow::Result<Option<Watermark>> {
        Ok(self
            .marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn write(&self, key: &str, mark: &Watermark) -> anyhow::Result<()> {
        self.marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), mark.clone());
        Ok(())
    }
}
