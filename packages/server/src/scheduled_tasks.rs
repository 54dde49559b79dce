//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Three schedules drive the system:
//! - crawl dispatch every minute
//! - notification dispatch every 30 seconds
//! - retention sweep daily at 03:00
//!
//! Each tick enqueues work or prunes storage; the actual crawling and
//! notifying happens in the queue workers.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use adscout::{JobDispatcher, ListingStore, NotificationDispatcher};

/// Start all scheduled tasks
pub async fn start_scheduler(
    crawl_dispatcher: Arc<JobDispatcher>,
    notify_dispatcher: Arc<NotificationDispatcher>,
    listings: Arc<dyn ListingStore>,
    retention_days: i64,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let dispatcher = Arc::clone(&crawl_dispatcher);
    let crawl_job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
        let dispatcher = Arc::clone(&dispatcher);
        Box::pin(async move {
            if let Err(e) = dispatcher.dispatch().await {
                tracing::error!("Crawl dispatch tick failed: {}", e);
            }
        })
    })?;
    scheduler.add(crawl_job).await?;

    let dispatcher = Arc::clone(&notify_dispatcher);
    let notify_job = Job::new_async("*/30 * * * * *", move |_uuid, _lock| {
        let dispatcher = Arc::clone(&dispatcher);
        Box::pin(async move {
            if let Err(e) = dispatcher.dispatch().await {
                tracing::error!("Notify dispatch tick failed: {}", e);
            }
        })
    })?;
    scheduler.add(notify_job).await?;

    let store = Arc::clone(&listings);
    let retention_job = Job::new_async("0 0 3 * * *", move |_uuid, _lock| {
        let store = Arc::clone(&store);
        Box::pin(async move {
            if let Err(e) = run_retention_sweep(&store, retention_days).await {
                tracing::error!("Retention sweep failed: {}", e);
            }
        })
    })?;
    scheduler.add(retention_job).await?;

    scheduler.start().await?;
    tracing::info!(
        retention_days,
        "Scheduled tasks started (crawl dispatch every minute, notify every 30s, retention daily)"
    );
    Ok(scheduler)
}

/// Drop listings past the retention window.
async fn run_retention_sweep(listings: &Arc<dyn ListingStore>, retention_days: i64) -> Result<()> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let deleted = listings.delete_older_than(cutoff).await?;
    tracing::info!(%cutoff, deleted, "retention sweep complete");
    Ok(())
}
