use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turnstile::Watermarked;
use uuid::Uuid;

/// Identifier of an external listings source (e.g. `avito`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of a crawl region (e.g. `spb`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Identifier of a notification subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub String);

impl SubscriberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// One crawl target: a (source, region) pair.
///
/// Derives the lock key and the queue partition key. The canonical string
/// form is `source:region`; source and region slugs must not contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkKey {
    pub source: SourceId,
    pub region: RegionId,
}

impl WorkKey {
    pub fn new(source: SourceId, region: RegionId) -> Self {
        Self { source, region }
    }

    /// Key under which this target is locked while a crawl is in flight.
    pub fn lock_key(&self) -> String {
        format!("crawl_{}_{}", self.source, self.region)
    }

    /// Parse the canonical `source:region` form.
    pub fn parse(raw: &str) -> Option<Self> {
        let (source, region) = raw.split_once(':')?;
        if source.is_empty() || region.is_empty() {
            return None;
        }
        Some(Self::new(SourceId(source.to_owned()), RegionId(region.to_owned())))
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.region)
    }
}

/// Unique identifier for a stored listing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingId(pub Uuid);

impl ListingId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ListingId {
    fn default() -> Self {
        Self::new()
    }
}

/// Who placed the ad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerKind {
    Private,
    Dealer,
}

/// A normalized classified-ad record.
///
/// `external_url` is the business identity: two records with the same url
/// are the same ad. Source-specific fields (engine, mileage, rooms, ...)
/// ride along in `attributes` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: ListingId,
    pub source: SourceId,
    pub region: RegionId,
    pub external_url: String,
    pub title: String,
    pub price: i64,
    pub posted_at: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub seller: Option<SellerKind>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Watermarked for ListingRecord {
    fn mark_id(&self) -> &str {
        &self.external_url
    }

    fn marked_at(&self) -> DateTime<Utc> {
        self.posted_at
    }
}

/// Credentials for an authenticated egress proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub user: String,
    pub password: String,
}

/// One egress proxy. A value, not an identity: pool membership is presence
/// in the shared list, and equality is field-by-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub auth: Option<ProxyAuth>,
    #[serde(default)]
    pub banned_at: Option<DateTime<Utc>>,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auth: None,
            banned_at: None,
        }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }

    pub fn into_banned(mut self, at: DateTime<Utc>) -> Self {
        self.banned_at = Some(at);
        self
    }

    /// The proxy endpoint as a url, without credentials.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingFilter {
    #[serde(default)]
    pub sources: Vec<SourceId>,
    #[serde(default)]
    pub regions: Vec<RegionId>,
    #[serde(default)]
    pub price_min: Option<i64>,
    #[serde(default)]
    pub price_max: Option<i64>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ListingFilter {
    /// Whether a record satisfies every configured constraint.
    ///
    /// Empty lists match everything; this is the reference semantics the
    /// SQL implementation mirrors.
    pub fn matches(&self, record: &ListingRecord) -> bool {
        if !self.sources.is_empty() && !self.sources.contains(&record.source) {
            return false;
        }
        if !self.regions.is_empty() && !self.regions.contains(&record.region) {
            return false;
        }
        if self.price_min.is_some_and(|min| record.price < min) {
            return false;
        }
        if self.price_max.is_some_and(|max| record.price > max) {
            return false;
        }
        if !self.keywords.is_empty() {
            let title = record.title.to_lowercase();
            if !self
                .keywords
                .iter()
                .any(|kw| title.contains(&kw.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

/// A notification subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub active: bool,
    #[serde(default)]
    pub filter: ListingFilter,
}

impl Subscriber {
    /// Key under which this subscriber is locked while a notification run
    /// is in flight.
    pub fn lock_key(&self) -> String {
        notify_lock_key(&self.id)
    }
}

pub fn notify_lock_key(id: &SubscriberId) -> String {
    format!("notify_{id}")
}
