//! adscout server: crawl + notification workers, dispatch schedules, and
//! the coordination plumbing wiring them together.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile::{DistributedLock, KvStore, RedisKv, RetryPolicy, WatermarkTracker};

use adscout::{
    ConsumerSettings, CrawlBoundaryStore, JobConsumer, JobDispatcher, ListingStore,
    NotificationConsumer, NotificationDispatcher, ProviderRegistry, ProxyPool, SubscriberStore,
    WatchStateStore,
};
use server_core::{
    queue, scheduled_tasks, Config, HttpProvider, JetStreamTransport, PostgresStore,
    TelegramChannel,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,adscout=debug,turnstile=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!("Starting adscout server");

    let config = Config::from_env()?;

    // Database setup
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    // Shared coordination store
    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::connect(&config.redis_url).await?);
    let lock = DistributedLock::new(kv.clone(), "adscout");

    let store = Arc::new(PostgresStore::new(pool.clone()));
    let listings: Arc<dyn ListingStore> = store.clone();
    let subscribers: Arc<dyn SubscriberStore> = store.clone();

    let proxy_pool = ProxyPool::new(
        kv.clone(),
        RetryPolicy {
            attempts: config.proxy_retry_attempts,
            interval: config.proxy_retry_interval,
        },
    );
    if !config.seed_proxies.is_empty() && proxy_pool.items().await?.is_empty() {
        for proxy in &config.seed_proxies {
            proxy_pool.add(proxy).await?;
        }
        tracing::info!(count = config.seed_proxies.len(), "seeded proxy pool");
    }

    // Providers: one parser sidecar per configured source
    let mut registry = ProviderRegistry::new();
    for source in &config.sources {
        let endpoint = config
            .provider_endpoints
            .get(source.as_str())
            .with_context(|| format!("no provider endpoint configured for source {source}"))?;
        registry.register(
            source.clone(),
            Arc::new(HttpProvider::new(source.clone(), endpoint.clone(), true)),
        );
    }

    // Queue transport
    let transport = Arc::new(
        JetStreamTransport::connect(&config.nats_url, config.partitions).await?,
    );
    transport.ensure_streams().await?;

    let settings = ConsumerSettings {
        lock_ttl: config.lock_ttl,
        lock_extend_interval: config.lock_extend_interval,
        heartbeat_interval: config.heartbeat_interval,
    };

    let crawl_tracker = WatermarkTracker::new(
        Arc::new(CrawlBoundaryStore::new(listings.clone())),
        config.staleness,
    );
    let crawl_consumer = Arc::new(JobConsumer::new(
        lock.clone(),
        proxy_pool,
        crawl_tracker,
        Arc::new(registry),
        listings.clone(),
        settings.clone(),
    ));

    let watch_tracker = WatermarkTracker::new(
        Arc::new(WatchStateStore::new(subscribers.clone())),
        config.staleness,
    );
    let notify_consumer = Arc::new(NotificationConsumer::new(
        lock.clone(),
        subscribers.clone(),
        listings.clone(),
        Arc::new(TelegramChannel::new(config.telegram_bot_token.clone())),
        watch_tracker,
        settings,
    ));

    // Workers: one durable consumer per partition, one task per job
    let _crawl_workers =
        queue::run_crawl_workers(&transport, crawl_consumer, config.ack_wait).await?;
    let _notify_workers =
        queue::run_notify_workers(&transport, notify_consumer, config.ack_wait).await?;

    // Dispatch schedules
    let crawl_dispatcher = Arc::new(JobDispatcher::new(
        lock.clone(),
        transport.clone(),
        &config.sources,
        &config.regions,
    ));
    let notify_dispatcher = Arc::new(NotificationDispatcher::new(
        lock.clone(),
        transport.clone(),
        subscribers.clone(),
    ));
    let _scheduler = scheduled_tasks::start_scheduler(
        crawl_dispatcher,
        notify_dispatcher,
        listings.clone(),
        config.retention_days,
    )
    .await?;

    tracing::info!("adscout server running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}
