//! Delegating provider: scraping runs in a per-source parser sidecar
//! reached over HTTP.
//!
//! The sidecar receives the region and the crawl boundary, pages the feed
//! newest-first applying the boundary stop rule, and responds with the new
//! records (plus an optional boundary hint when it computed a better one).
//! Egress goes through the lent pool proxy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use turnstile::Watermark;

use adscout::{
    Heartbeat, ListingRecord, Provider, ProviderError, ProviderFindings, Proxy, SourceId, WorkKey,
};

pub struct HttpProvider {
    source: SourceId,
    endpoint: String,
    requires_proxy: bool,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct FindRequest<'a> {
    region: &'a str,
    boundary: &'a Watermark,
}

#[derive(Deserialize)]
struct FindResponse {
    records: Vec<ListingRecord>,
    #[serde(default)]
    boundary_hint: Option<Watermark>,
}

impl HttpProvider {
    pub fn new(source: SourceId, endpoint: String, requires_proxy: bool) -> Self {
        Self {
            source,
            endpoint,
            requires_proxy,
            request_timeout: Duration::from_secs(240),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn other(err: impl Into<anyhow::Error>) -> ProviderError {
        ProviderError::Other(err.into())
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn requires_proxy(&self) -> bool {
        self.requires_proxy
    }

    async fn find(
        &self,
        key: &WorkKey,
        boundary: &Watermark,
        proxy: Option<&Proxy>,
        heartbeat: Arc<dyn Heartbeat>,
    ) -> Result<ProviderFindings, ProviderError> {
        let _ = heartbeat.beat().await;

        // the client is built per call: the proxy differs per borrow
        let mut builder = reqwest::Client::builder().timeout(self.request_timeout);
        if let Some(proxy) = proxy {
            let mut upstream = reqwest::Proxy::all(proxy.url()).map_err(Self::other)?;
            if let Some(auth) = &proxy.auth {
                upstream = upstream.basic_auth(&auth.user, &auth.password);
            }
            builder = builder.proxy(upstream);
        }
        let client = builder.build().map_err(Self::other)?;

        let url = format!("{}/find", self.endpoint.trim_end_matches('/'));
        debug!(source = %self.source, %key, url, "delegating crawl to parser");

        let response = client
            .post(&url)
            .json(&FindRequest {
                region: key.region.as_str(),
                boundary,
            })
            .send()
            .await
            .map_err(Self::other)?;

        match response.status() {
            StatusCode::FORBIDDEN | StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                return Err(ProviderError::ProxyBanned);
            }
            _ => {}
        }
        let response = response.error_for_status().map_err(Self::other)?;
        let parsed: FindResponse = response.json().await.map_err(Self::other)?;

        debug!(
            source = %self.source,
            %key,
            records = parsed.records.len(),
            "parser responded"
        );
        Ok(ProviderFindings {
            records: parsed.records,
            boundary_hint: parsed.boundary_hint,
        })
    }
}
