//! # adscout
//!
//! Incremental crawling and notification for external classified-ad feeds,
//! coordinated across worker replicas by the primitives in [`turnstile`].
//!
//! ```text
//! JobDispatcher ──► queue ──► JobConsumer ──► Provider (external feed)
//!      │                         │  │  │
//!      │ peek                    │  │  └─► ListingStore (persistence)
//!      ▼                         ▼  ▼
//! DistributedLock ◄── acquire  ProxyPool  WatermarkTracker
//!
//! NotificationDispatcher ──► queue ──► NotificationConsumer ──► channel
//! ```
//!
//! Crawl targets are (source, region) pairs; the notification flow is the
//! same machinery keyed by subscriber id. Guarantees: at most one in-flight
//! crawl per key across all replicas (lock), resumption exactly where the
//! last crawl stopped (watermark + tie set), conservation of the proxy
//! pool, and broker liveness across arbitrarily long jobs (heartbeat).

pub mod consume;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod partition;
pub mod provider;
pub mod proxy;
pub mod storage;
pub mod transport;
pub mod types;

pub use consume::{ConsumerSettings, CrawlOutcome, JobConsumer, JobState};
pub use dispatch::{DispatchStats, JobDispatcher, NotificationDispatcher};
pub use error::JobError;
pub use notify::{NotificationChannel, NotificationConsumer, NotifyOutcome};
pub use partition::{partition_for, partition_subject};
pub use provider::{Provider, ProviderError, ProviderFindings, ProviderRegistry};
pub use proxy::ProxyPool;
pub use storage::{CrawlBoundaryStore, ListingStore, SubscriberStore, WatchStateStore};
pub use transport::{
    CrawlJob, Heartbeat, HeartbeatPulse, JobTransport, NotifyJob, CRAWL_TOPIC, NOTIFY_TOPIC,
};
pub use types::{
    ListingFilter, ListingRecord, Proxy, ProxyAuth, RegionId, SellerKind, SourceId, Subscriber,
    SubscriberId, WorkKey,
};
