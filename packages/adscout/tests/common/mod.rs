//! Shared fixtures for the flow tests: a scripted provider standing in for
//! an external feed, a recording notification channel, and a fully wired
//! consumer stack over the in-memory stores.

// each test binary uses a different subset of the harness
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use turnstile::{DistributedLock, MemoryKv, RetryPolicy, Watermark, WatermarkTracker};

use adscout::storage::memory::{MemoryListingStore, MemorySubscriberStore};
use adscout::storage::{CrawlBoundaryStore, WatchStateStore};
use adscout::transport::TestTransport;
use adscout::types::ListingId;
use adscout::{
    ConsumerSettings, Heartbeat, JobConsumer, JobDispatcher, ListingRecord, NotificationChannel,
    NotificationConsumer, Provider, ProviderError, ProviderFindings, ProviderRegistry, Proxy,
    ProxyPool, Subscriber, WorkKey,
};

pub const STALENESS_MINUTES: i64 = 5;

pub fn record(source: &str, region: &str, url: &str, posted_at: DateTime<Utc>) -> ListingRecord {
    ListingRecord {
        id: ListingId::new(),
        source: source.into(),
        region: region.into(),
        external_url: url.to_owned(),
        title: format!("listing {url}"),
        price: 1_000,
        posted_at,
        image_url: None,
        seller: None,
        attributes: serde_json::Value::Null,
    }
}

/// How a scripted run should end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    None,
    ProxyBanned,
    Error,
}

/// Stands in for an external feed: pages its scripted records newest-first
/// and stops at the boundary, the way a real provider must.
pub struct ScriptedProvider {
    feed: Mutex<Vec<ListingRecord>>,
    failure: Mutex<FailureMode>,
    requires_proxy: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(requires_proxy: bool) -> Self {
        Self {
            feed: Mutex::new(Vec::new()),
            failure: Mutex::new(FailureMode::None),
            requires_proxy,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn publish(&self, record: ListingRecord) {
        self.feed.lock().unwrap().push(record);
    }

    pub fn fail_with(&self, mode: FailureMode) {
        *self.failure.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn requires_proxy(&self) -> bool {
        self.requires_proxy
    }

    async fn find(
        &self,
        _key: &WorkKey,
        boundary: &Watermark,
        proxy: Option<&Proxy>,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Result<ProviderFindings, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = heartbeat.beat().await;

        match *self.failure.lock().unwrap() {
            FailureMode::ProxyBanned => return Err(ProviderError::ProxyBanned),
            FailureMode::Error => {
                return Err(ProviderError::Other(anyhow::anyhow!("scripted failure")))
            }
            FailureMode::None => {}
        }

        if self.requires_proxy {
            assert!(proxy.is_some(), "provider invoked without a proxy");
        }

        // newest first, later-published entries ahead of earlier ones on a
        // timestamp tie, like a real feed page
        let mut page: Vec<ListingRecord> = self.feed.lock().unwrap().clone();
        page.reverse();
        page.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));

        let now = Utc::now();
        let staleness = chrono::Duration::minutes(STALENESS_MINUTES);
        let records: Vec<ListingRecord> = page
            .into_iter()
            .take_while(|r| !boundary.cuts_off(&r.external_url, r.posted_at, now, staleness))
            .collect();

        Ok(ProviderFindings {
            records,
            boundary_hint: None,
        })
    }
}

/// A fully wired crawl stack over the in-memory fakes.
pub struct CrawlHarness {
    pub kv: Arc<MemoryKv>,
    pub lock: DistributedLock,
    pub transport: Arc<TestTransport>,
    pub listings: Arc<MemoryListingStore>,
    pub provider: Arc<ScriptedProvider>,
    pub consumer: JobConsumer,
    pub dispatcher: JobDispatcher,
}

impl CrawlHarness {
    pub fn new(requires_proxy: bool) -> Self {
        let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());
        let lock = DistributedLock::new(kv.clone(), "adscout");
        let transport = Arc::new(TestTransport::new());
        let listings = Arc::new(MemoryListingStore::new());
        let provider = Arc::new(ScriptedProvider::new(requires_proxy));

        let mut registry = ProviderRegistry::new();
        registry.register("avito".into(), provider.clone());

        let tracker = WatermarkTracker::new(
            Arc::new(CrawlBoundaryStore::new(listings.clone())),
            chrono::Duration::minutes(STALENESS_MINUTES),
        );
        let pool = ProxyPool::new(
            kv.clone(),
            RetryPolicy {
                attempts: 2,
                interval: Duration::from_millis(10),
            },
        );

        let consumer = JobConsumer::new(
            lock.clone(),
            pool,
            tracker,
            Arc::new(registry),
            listings.clone(),
            ConsumerSettings {
                lock_ttl: Duration::from_secs(60),
                lock_extend_interval: None,
                heartbeat_interval: Duration::from_millis(1500),
            },
        );
        let dispatcher = JobDispatcher::new(
            lock.clone(),
            transport.clone(),
            &["avito".into()],
            &["spb".into()],
        );

        Self {
            kv,
            lock,
            transport,
            listings,
            provider,
            consumer,
            dispatcher,
        }
    }

    pub fn pool(&self) -> ProxyPool {
        ProxyPool::new(
            self.kv.clone(),
            RetryPolicy {
                attempts: 2,
                interval: Duration::from_millis(10),
            },
        )
    }

    pub fn work_key(&self) -> WorkKey {
        WorkKey::new("avito".into(), "spb".into())
    }
}

/// Records deliveries instead of sending them anywhere.
#[derive(Default)]
pub struct RecordingChannel {
    deliveries: Mutex<Vec<(String, Vec<String>)>>,
    fail: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// (subscriber id, delivered urls) per deliver call.
    pub fn deliveries(&self) -> Vec<(String, Vec<String>)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn deliver(
        &self,
        subscriber: &Subscriber,
        records: &[ListingRecord],
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("scripted delivery failure");
        }
        self.deliveries.lock().unwrap().push((
            subscriber.id.as_str().to_owned(),
            records.iter().map(|r| r.external_url.clone()).collect(),
        ));
        Ok(())
    }
}

/// A fully wired notification stack over the in-memory fakes.
pub struct NotifyHarness {
    pub lock: DistributedLock,
    pub subscribers: Arc<MemorySubscriberStore>,
    pub listings: Arc<MemoryListingStore>,
    pub channel: Arc<RecordingChannel>,
    pub consumer: NotificationConsumer,
}

impl NotifyHarness {
    pub fn new() -> Self {
        let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());
        let lock = DistributedLock::new(kv, "adscout");
        let subscribers = Arc::new(MemorySubscriberStore::new());
        let listings = Arc::new(MemoryListingStore::new());
        let channel = Arc::new(RecordingChannel::new());

        let tracker = WatermarkTracker::new(
            Arc::new(WatchStateStore::new(subscribers.clone())),
            chrono::Duration::minutes(STALENESS_MINUTES),
        );
        let consumer = NotificationConsumer::new(
            lock.clone(),
            subscribers.clone(),
            listings.clone(),
            channel.clone(),
            tracker,
            ConsumerSettings::default(),
        );

        Self {
            lock,
            subscribers,
            listings,
            channel,
            consumer,
        }
    }
}
