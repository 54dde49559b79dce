//! The external source provider contract.
//!
//! A provider knows how to page one external feed newest-first, stopping at
//! the crawl boundary. The consumer never fetches or parses pages itself;
//! its obligations end at supplying the boundary, an optional egress proxy,
//! and the liveness heartbeat.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use turnstile::Watermark;

use crate::error::JobError;
use crate::transport::Heartbeat;
use crate::types::{ListingRecord, Proxy, SourceId, WorkKey};

/// What one provider run produced.
#[derive(Debug, Default)]
pub struct ProviderFindings {
    /// Newly discovered records, not previously behind the boundary.
    pub records: Vec<ListingRecord>,
    /// A boundary the provider computed itself, overriding the one derived
    /// from `records`.
    pub boundary_hint: Option<Watermark>,
}

/// Failures surfaced by a provider run.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The upstream rejected the lent proxy; the caller must evict it
    /// instead of returning it to circulation.
    #[error("upstream rejected the proxy")]
    ProxyBanned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One external feed implementation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Whether runs need network egress through a pooled proxy.
    fn requires_proxy(&self) -> bool {
        true
    }

    /// Page the feed for `key` from `boundary`, pulsing `heartbeat` during
    /// long operations.
    async fn find(
        &self,
        key: &WorkKey,
        boundary: &Watermark,
        proxy: Option<&Proxy>,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Result<ProviderFindings, ProviderError>;
}

/// Capability-keyed provider lookup.
///
/// Unknown sources are an explicit error; there is deliberately no default
/// provider to fall back to.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<SourceId, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: SourceId, provider: Arc<dyn Provider>) {
        self.providers.insert(source, provider);
    }

    pub fn get(&self, source: &SourceId) -> Result<Arc<dyn Provider>, JobError> {
        self.providers
            .get(source)
            .cloned()
            .ok_or_else(|| JobError::UnknownSource(source.clone()))
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceId> {
        self.providers.keys()
    }
}
