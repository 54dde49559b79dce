//! The shared proxy pool, with ban handling layered over the raw
//! [`turnstile::ResourcePool`].
//!
//! Proxies are global, not per work key. Acquire skips values already
//! stamped `banned_at`: they are popped and dropped, never lent out again.
//! A ban discovered mid-job is reported by the provider and handled through
//! [`ProxyPool::finish`], which evicts instead of returning the value.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use turnstile::{KvStore, PoolError, ResourcePool, RetryPolicy};

use crate::types::Proxy;

/// Store list holding the proxy credentials.
pub const PROXY_POOL_KEY: &str = "proxy";

pub struct ProxyPool {
    inner: ResourcePool<Proxy>,
}

impl ProxyPool {
    pub fn new(kv: Arc<dyn KvStore>, retry: RetryPolicy) -> Self {
        Self {
            inner: ResourcePool::new(kv, PROXY_POOL_KEY).with_retry(retry),
        }
    }

    /// Return a proxy to circulation.
    pub async fn add(&self, proxy: &Proxy) -> Result<(), PoolError> {
        self.inner.add(proxy).await
    }

    /// Borrow a usable proxy, dropping banned values encountered on the way.
    pub async fn acquire(&self) -> Result<Proxy, PoolError> {
        loop {
            let proxy = self.inner.acquire().await?;
            if proxy.is_banned() {
                // popped and not re-added: the ban is the eviction
                info!(host = %proxy.host, port = proxy.port, "dropping banned proxy from pool");
                continue;
            }
            return Ok(proxy);
        }
    }

    /// Evict a borrowed proxy: stamp `banned_at`, clear any stray copies
    /// still in the list, and do not return it to circulation.
    pub async fn evict(&self, proxy: Proxy) -> Result<Proxy, PoolError> {
        let stray = self.inner.remove(&proxy).await?;
        let banned = proxy.into_banned(Utc::now());
        info!(host = %banned.host, port = banned.port, stray, "proxy evicted");
        Ok(banned)
    }

    /// Guaranteed-cleanup return path for a borrowed proxy.
    ///
    /// Runs on every job exit; errors are logged rather than propagated so
    /// cleanup never masks the job result.
    pub async fn finish(&self, proxy: Proxy, banned: bool) {
        let result = if banned {
            self.evict(proxy).await.map(|_| ())
        } else {
            self.add(&proxy).await
        };
        if let Err(err) = result {
            warn!(error = %err, "failed to return proxy to pool");
        }
    }

    /// Proxies currently available (not checked out).
    pub async fn items(&self) -> Result<Vec<Proxy>, PoolError> {
        self.inner.items().await
    }
}
