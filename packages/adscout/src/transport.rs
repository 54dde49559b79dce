//! Queue transport and consumer-liveness seams.
//!
//! The dispatchers publish through [`JobTransport`]; the concrete broker
//! binding lives in the server crate. [`Heartbeat`] is the consumer's
//! liveness obligation: a single crawl can run far longer than the broker's
//! session timeout, so the handler pulses the broker on a short fixed
//! cadence for the duration of the job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::types::{RegionId, SourceId, SubscriberId, WorkKey};

/// Topic carrying crawl requests; subjects are `crawl.requested.{partition}`.
pub const CRAWL_TOPIC: &str = "crawl.requested";
/// Topic carrying notification requests; subjects are `notify.requested.{partition}`.
pub const NOTIFY_TOPIC: &str = "notify.requested";

/// One crawl request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub source: SourceId,
    pub region: RegionId,
}

impl CrawlJob {
    pub fn for_key(key: &WorkKey) -> Self {
        Self {
            source: key.source.clone(),
            region: key.region.clone(),
        }
    }

    pub fn work_key(&self) -> WorkKey {
        WorkKey::new(self.source.clone(), self.region.clone())
    }
}

/// One notification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyJob {
    pub subscriber_id: SubscriberId,
}

/// Publishing side of the queue.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn publish_crawl(&self, job: &CrawlJob) -> anyhow::Result<()>;
    async fn publish_notify(&self, job: &NotifyJob) -> anyhow::Result<()>;
}

/// Liveness signal for one in-flight job.
///
/// Each beat tells the broker the consumer is still working, resetting its
/// delivery timeout.
#[async_trait]
pub trait Heartbeat: Send + Sync {
    async fn beat(&self) -> anyhow::Result<()>;
}

/// Background task pulsing a [`Heartbeat`] on a fixed cadence.
///
/// The task is aborted when the pulse is dropped, so tying its lifetime to
/// the handler scope guarantees the cadence covers exactly the duration of
/// the job. Beat failures are logged, not fatal: the broker timeout is the
/// arbiter of liveness.
pub struct HeartbeatPulse {
    handle: JoinHandle<()>,
}

impl HeartbeatPulse {
    pub fn start(heartbeat: Arc<dyn Heartbeat>, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(err) = heartbeat.beat().await {
                    warn!(error = %err, "heartbeat delivery failed");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for HeartbeatPulse {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Heartbeat that goes nowhere, for callers outside any broker session.
pub struct NoopHeartbeat;

#[async_trait]
impl Heartbeat for NoopHeartbeat {
    async fn beat(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory transport that records published jobs for test assertions.
#[derive(Default)]
pub struct TestTransport {
    crawl: std::sync::Mutex<Vec<CrawlJob>>,
    notify: std::sync::Mutex<Vec<NotifyJob>>,
}

impl TestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn crawl_jobs(&self) -> Vec<CrawlJob> {
        self.crawl.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn notify_jobs(&self) -> Vec<NotifyJob> {
        self.notify
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.crawl.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.notify
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl JobTransport for TestTransport {
    async fn publish_crawl(&self, job: &CrawlJob) -> anyhow::Result<()> {
        self.crawl
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.clone());
        Ok(())
    }

    async fn publish_notify(&self, job: &NotifyJob) -> anyhow::Result<()> {
        self.notify
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.clone());
        Ok(())
    }
}

/// Heartbeat counting its beats, for liveness tests.
#[derive(Default)]
pub struct CountingHeartbeat {
    beats: std::sync::atomic::AtomicUsize,
}

impl CountingHeartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beats(&self) -> usize {
        self.beats.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl Heartbeat for CountingHeartbeat {
    async fn beat(&self) -> anyhow::Result<()> {
        self.beats
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pulse_beats_on_cadence_until_dropped() {
        let heartbeat = Arc::new(CountingHeartbeat::new());
        let pulse = HeartbeatPulse::start(heartbeat.clone(), Duration::from_millis(1500));
        // let the pulse task register its interval before moving the clock
        tokio::task::yield_now().await;

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(1500)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(heartbeat.beats(), 3);

        drop(pulse);
        tokio::time::advance(Duration::from_millis(4500)).await;
        tokio::task::yield_now().await;
        assert_eq!(heartbeat.beats(), 3);
    }

    #[test]
    fn test_crawl_job_roundtrips_with_its_key() {
        let key = WorkKey::new("avito".into(), "spb".into());
        let job = CrawlJob::for_key(&key);
        assert_eq!(job.work_key(), key);
    }
}
