//! NATS JetStream binding for the job queue.
//!
//! Crawl and notify topics are JetStream streams over partitioned subjects
//! (`crawl.requested.{partition}`); each partition gets a durable
//! explicit-ack pull consumer shared by every worker replica, which is the
//! consumer-group semantics the dispatchers assume. `ack_wait` is the
//! broker's liveness timeout: a handler that stops sending progress acks
//! has its message redelivered elsewhere. Job failures are NAKed, so
//! redelivery is the only retry path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use async_nats::jetstream::consumer::{pull, AckPolicy};
use async_nats::jetstream::{self, stream, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use adscout::{
    partition_subject, CrawlJob, Heartbeat, JobConsumer, JobTransport, NotificationConsumer,
    NotifyJob, CRAWL_TOPIC, NOTIFY_TOPIC,
};

pub const CRAWL_STREAM: &str = "CRAWL";
pub const NOTIFY_STREAM: &str = "NOTIFY";

/// Publishing and stream management over one JetStream context.
#[derive(Clone)]
pub struct JetStreamTransport {
    context: jetstream::Context,
    partitions: u32,
}

impl JetStreamTransport {
    pub async fn connect(nats_url: &str, partitions: u32) -> Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .context("connecting to nats")?;
        Ok(Self {
            context: jetstream::new(client),
            partitions,
        })
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Create the crawl and notify streams if they do not exist yet.
    pub async fn ensure_streams(&self) -> Result<()> {
        for (name, topic) in [(CRAWL_STREAM, CRAWL_TOPIC), (NOTIFY_STREAM, NOTIFY_TOPIC)] {
            self.context
                .get_or_create_stream(stream::Config {
                    name: name.to_string(),
                    subjects: vec![format!("{topic}.>").into()],
                    ..Default::default()
                })
                .await
                .map_err(|err| anyhow!("creating stream {name}: {err}"))?;
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, partition_key: &str, payload: Vec<u8>) -> Result<()> {
        let subject = partition_subject(topic, partition_key, self.partitions);
        self.context
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|err| anyhow!("publishing to {subject}: {err}"))?
            .await
            .map_err(|err| anyhow!("awaiting publish ack on {subject}: {err}"))?;
        debug!(subject, "job published");
        Ok(())
    }
}

#[async_trait]
impl JobTransport for JetStreamTransport {
    async fn publish_crawl(&self, job: &CrawlJob) -> Result<()> {
        self.publish(
            CRAWL_TOPIC,
            &job.work_key().to_string(),
            serde_json::to_vec(job)?,
        )
        .await
    }

    async fn publish_notify(&self, job: &NotifyJob) -> Result<()> {
        self.publish(
            NOTIFY_TOPIC,
            job.subscriber_id.as_str(),
            serde_json::to_vec(job)?,
        )
        .await
    }
}

/// [`Heartbeat`] over a delivered JetStream message: each beat is an
/// in-progress ack, resetting the broker's `ack_wait` timer.
pub struct JetStreamHeartbeat {
    message: Arc<jetstream::Message>,
}

impl JetStreamHeartbeat {
    pub fn new(message: Arc<jetstream::Message>) -> Self {
        Self { message }
    }
}

#[async_trait]
impl Heartbeat for JetStreamHeartbeat {
    async fn beat(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(|err| anyhow!("progress ack failed: {err}"))
    }
}

/// Start one worker task per crawl partition.
pub async fn run_crawl_workers(
    transport: &JetStreamTransport,
    consumer: Arc<JobConsumer>,
    ack_wait: Duration,
) -> Result<Vec<JoinHandle<()>>> {
    spawn_partition_workers(
        transport,
        CRAWL_STREAM,
        CRAWL_TOPIC,
        "crawl-workers",
        ack_wait,
        move |message| {
            let consumer = Arc::clone(&consumer);
            async move { handle_crawl_message(consumer, message).await }
        },
    )
    .await
}

/// Start one worker task per notify partition.
pub async fn run_notify_workers(
    transport: &JetStreamTransport,
    consumer: Arc<NotificationConsumer>,
    ack_wait: Duration,
) -> Result<Vec<JoinHandle<()>>> {
    spawn_partition_workers(
        transport,
        NOTIFY_STREAM,
        NOTIFY_TOPIC,
        "notify-workers",
        ack_wait,
        move |message| {
            let consumer = Arc::clone(&consumer);
            async move { handle_notify_message(consumer, message).await }
        },
    )
    .await
}

async fn handle_crawl_message(consumer: Arc<JobConsumer>, message: Arc<jetstream::Message>) {
    let job: CrawlJob = match serde_json::from_slice(&message.payload) {
        Ok(job) => job,
        Err(err) => {
            error!(error = %err, "malformed crawl job, terminating delivery");
            settle(&message, AckKind::Term).await;
            return;
        }
    };
    let heartbeat: Arc<dyn Heartbeat> = Arc::new(JetStreamHeartbeat::new(Arc::clone(&message)));
    match consumer.handle(&job, heartbeat).await {
        Ok(outcome) => {
            debug!(source = %job.source, region = %job.region, ?outcome, "crawl job settled");
            settle(&message, AckKind::Ack).await;
        }
        Err(err) => {
            error!(source = %job.source, region = %job.region, error = %err, "crawl job failed, leaving retry to the broker");
            settle(&message, AckKind::Nak(None)).await;
        }
    }
}

async fn handle_notify_message(
    consumer: Arc<NotificationConsumer>,
    message: Arc<jetstream::Message>,
) {
    let job: NotifyJob = match serde_json::from_slice(&message.payload) {
        Ok(job) => job,
        Err(err) => {
            error!(error = %err, "malformed notify job, terminating delivery");
            settle(&message, AckKind::Term).await;
            return;
        }
    };
    let heartbeat: Arc<dyn Heartbeat> = Arc::new(JetStreamHeartbeat::new(Arc::clone(&message)));
    match consumer.handle(&job, heartbeat).await {
        Ok(outcome) => {
            debug!(subscriber = %job.subscriber_id, ?outcome, "notify job settled");
            settle(&message, AckKind::Ack).await;
        }
        Err(err) => {
            error!(subscriber = %job.subscriber_id, error = %err, "notify job failed, leaving retry to the broker");
            settle(&message, AckKind::Nak(None)).await;
        }
    }
}

async fn settle(message: &jetstream::Message, kind: AckKind) {
    if let Err(err) = message.ack_with(kind).await {
        warn!(error = %err, "failed to settle message");
    }
}

async fn spawn_partition_workers<F, Fut>(
    transport: &JetStreamTransport,
    stream_name: &str,
    topic: &str,
    durable_prefix: &str,
    ack_wait: Duration,
    handler: F,
) -> Result<Vec<JoinHandle<()>>>
where
    F: Fn(Arc<jetstream::Message>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let stream = transport
        .context
        .get_stream(stream_name)
        .await
        .map_err(|err| anyhow!("getting stream {stream_name}: {err}"))?;

    let mut workers = Vec::with_capacity(transport.partitions as usize);
    for partition in 0..transport.partitions {
        let durable = format!("{durable_prefix}-{partition}");
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: format!("{topic}.{partition}"),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| anyhow!("creating consumer {durable}: {err}"))?;

        let handler = handler.clone();
        workers.push(tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(err) => {
                    error!(error = %err, durable, "failed to open message stream");
                    return;
                }
            };
            info!(durable, "worker listening");
            while let Some(next) = messages.next().await {
                match next {
                    // one task per job: a long crawl must not block the
                    // partition's other deliveries
                    Ok(message) => {
                        tokio::spawn(handler(Arc::new(message)));
                    }
                    Err(err) => warn!(error = %err, durable, "message stream error"),
                }
            }
            warn!(durable, "message stream closed");
        }));
    }
    Ok(workers)
}
