use std::collections::HashMap;
use std::env;
use std::time::Duration;

use adscout::{Proxy, RegionId, SourceId};
use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub nats_url: String,
    pub redis_url: String,
    pub database_url: String,
    /// Enumerated crawl sources; each needs an entry in `provider_endpoints`.
    pub sources: Vec<SourceId>,
    /// Enumerated crawl regions; the dispatcher covers sources × regions.
    pub regions: Vec<RegionId>,
    /// `source=url` pairs pointing at the per-source parser sidecars.
    pub provider_endpoints: HashMap<String, String>,
    pub lock_ttl: Duration,
    pub lock_extend_interval: Option<Duration>,
    pub heartbeat_interval: Duration,
    pub proxy_retry_attempts: u32,
    pub proxy_retry_interval: Duration,
    pub staleness: chrono::Duration,
    pub partitions: u32,
    /// Broker redelivery timeout; jobs heartbeat against it while running.
    pub ack_wait: Duration,
    pub retention_days: i64,
    pub telegram_bot_token: String,
    /// Proxies added to an empty pool at startup, until real pool
    /// management exists.
    pub seed_proxies: Vec<Proxy>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            sources: csv(&env::var("SOURCES").context("SOURCES must be set")?)
                .into_iter()
                .map(SourceId)
                .collect(),
            regions: csv(&env::var("REGIONS").context("REGIONS must be set")?)
                .into_iter()
                .map(RegionId)
                .collect(),
            provider_endpoints: parse_pairs(
                &env::var("PROVIDER_ENDPOINTS").context("PROVIDER_ENDPOINTS must be set")?,
            )?,
            lock_ttl: Duration::from_secs(parse_or("LOCK_TTL_SECS", 300)?),
            lock_extend_interval: env::var("LOCK_EXTEND_SECS")
                .ok()
                .map(|raw| {
                    raw.parse()
                        .map(Duration::from_secs)
                        .context("LOCK_EXTEND_SECS must be a number of seconds")
                })
                .transpose()?,
            heartbeat_interval: Duration::from_millis(parse_or("HEARTBEAT_INTERVAL_MS", 1_500)?),
            proxy_retry_attempts: parse_or("PROXY_RETRY_ATTEMPTS", 5)?,
            proxy_retry_interval: Duration::from_millis(parse_or("PROXY_RETRY_INTERVAL_MS", 1_000)?),
            staleness: chrono::Duration::seconds(parse_or("STALENESS_SECS", 300)?),
            partitions: parse_or("PARTITIONS", 8)?,
            ack_wait: Duration::from_secs(parse_or("ACK_WAIT_SECS", 30)?),
            retention_days: parse_or("RETENTION_DAYS", 7)?,
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN must be set")?,
            seed_proxies: env::var("SEED_PROXIES")
                .ok()
                .map(|raw| parse_proxies(&raw))
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

fn csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{name} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// Parse `key=value` pairs separated by commas.
fn parse_pairs(raw: &str) -> Result<HashMap<String, String>> {
    csv(raw)
        .into_iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
                .with_context(|| format!("expected key=value, got {entry:?}"))
        })
        .collect()
}

/// Parse `host:port` or `host:port:user:password` entries separated by
/// commas.
fn parse_proxies(raw: &str) -> Result<Vec<Proxy>> {
    csv(raw).into_iter().map(|entry| parse_proxy(&entry)).collect()
}

fn parse_proxy(raw: &str) -> Result<Proxy> {
    let parts: Vec<&str> = raw.split(':').collect();
    let (host, port) = match parts.as_slice() {
        [host, port] | [host, port, _, _] => (*host, *port),
        _ => anyhow::bail!("expected host:port or host:port:user:password, got {raw:?}"),
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid proxy port in {raw:?}"))?;
    let mut proxy = Proxy::new(host, port);
    if let [_, _, user, password] = parts.as_slice() {
        proxy = proxy.with_auth(*user, *password);
    }
    Ok(proxy)
}
