//! Notification flow tests: watch-state lifecycle, tie-set merging, and
//! the same lock/failure discipline as the crawl flow.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use turnstile::Watermark;

use adscout::storage::SubscriberStore;
use adscout::transport::NoopHeartbeat;
use adscout::{JobError, ListingStore, NotifyJob, NotifyOutcome, Subscriber, SubscriberId};
use common::{record, NotifyHarness};

fn heartbeat() -> Arc<NoopHeartbeat> {
    Arc::new(NoopHeartbeat)
}

fn subscriber(id: &str, active: bool) -> Subscriber {
    Subscriber {
        id: id.into(),
        active,
        filter: Default::default(),
    }
}

fn job(id: &str) -> NotifyJob {
    NotifyJob {
        subscriber_id: id.into(),
    }
}

#[tokio::test]
async fn test_cold_subscriber_is_anchored_at_now_not_flooded() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(subscriber("alice", true));
    harness
        .listings
        .append_records(&[record(
            "avito",
            "spb",
            "https://avito.example/old",
            Utc::now() - chrono::Duration::minutes(2),
        )])
        .await
        .unwrap();

    let outcome = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Delivered { delivered: 0 });

    // nothing went out, but the watch state now exists
    assert!(harness.channel.deliveries().is_empty());
    let state = harness.subscribers.watch_state(&SubscriberId("alice".into())).unwrap();
    assert!(state.last_seen_at.is_some());
    assert!(state.ids_at_last_seen.is_empty());
}

#[tokio::test]
async fn test_fresh_records_are_delivered_and_the_state_advances() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(subscriber("alice", true));

    let anchor = Utc::now() - chrono::Duration::minutes(3);
    harness
        .subscribers
        .write_watch_state(
            &SubscriberId("alice".into()),
            &Watermark {
                last_seen_at: Some(anchor),
                ids_at_last_seen: Vec::new(),
            },
        )
        .await
        .unwrap();

    let newest = Utc::now() - chrono::Duration::seconds(10);
    harness
        .listings
        .append_records(&[
            record("avito", "spb", "https://avito.example/1", anchor + chrono::Duration::seconds(30)),
            record("avito", "spb", "https://avito.example/2", newest),
        ])
        .await
        .unwrap();

    let outcome = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Delivered { delivered: 2 });

    let deliveries = harness.channel.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "alice");
    assert_eq!(
        deliveries[0].1,
        vec!["https://avito.example/1", "https://avito.example/2"]
    );

    let state = harness.subscribers.watch_state(&SubscriberId("alice".into())).unwrap();
    assert_eq!(state.last_seen_at, Some(newest));
    assert_eq!(state.ids_at_last_seen, vec!["https://avito.example/2"]);
}

#[tokio::test]
async fn test_ties_on_the_notified_instant_merge_instead_of_replacing() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(subscriber("alice", true));

    let tied = Utc::now() - chrono::Duration::minutes(1);
    harness
        .subscribers
        .write_watch_state(
            &SubscriberId("alice".into()),
            &Watermark {
                last_seen_at: Some(tied),
                ids_at_last_seen: vec!["https://avito.example/a".into()],
            },
        )
        .await
        .unwrap();

    // /a was already notified; /b landed on the very same instant later
    harness
        .listings
        .append_records(&[
            record("avito", "spb", "https://avito.example/a", tied),
            record("avito", "spb", "https://avito.example/b", tied),
        ])
        .await
        .unwrap();

    let outcome = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Delivered { delivered: 1 });
    assert_eq!(
        harness.channel.deliveries()[0].1,
        vec!["https://avito.example/b"]
    );

    // the prior tie id survives the merge
    let state = harness.subscribers.watch_state(&SubscriberId("alice".into())).unwrap();
    assert_eq!(
        state.ids_at_last_seen,
        vec!["https://avito.example/a", "https://avito.example/b"]
    );

    // a repeated run is a no-op and keeps the merged history intact
    let rerun = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();
    assert_eq!(rerun, NotifyOutcome::Delivered { delivered: 0 });
    assert_eq!(
        harness
            .subscribers
            .watch_state(&SubscriberId("alice".into()))
            .unwrap()
            .ids_at_last_seen,
        vec!["https://avito.example/a", "https://avito.example/b"]
    );
}

#[tokio::test]
async fn test_stale_watch_state_reanchors_instead_of_replaying() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(subscriber("alice", true));

    harness
        .subscribers
        .write_watch_state(
            &SubscriberId("alice".into()),
            &Watermark {
                last_seen_at: Some(Utc::now() - chrono::Duration::minutes(10)),
                ids_at_last_seen: vec!["https://avito.example/forgotten".into()],
            },
        )
        .await
        .unwrap();
    harness
        .listings
        .append_records(&[record(
            "avito",
            "spb",
            "https://avito.example/meanwhile",
            Utc::now() - chrono::Duration::minutes(8),
        )])
        .await
        .unwrap();

    let outcome = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();

    // the 10-minute-old state is past the 5-minute staleness threshold:
    // treated as cold, re-anchored at now, nothing replayed
    assert_eq!(outcome, NotifyOutcome::Delivered { delivered: 0 });
    assert!(harness.channel.deliveries().is_empty());
    let state = harness.subscribers.watch_state(&SubscriberId("alice".into())).unwrap();
    assert!(state.last_seen_at.unwrap() > Utc::now() - chrono::Duration::minutes(1));
    assert!(state.ids_at_last_seen.is_empty());
}

#[tokio::test]
async fn test_filter_limits_what_goes_out() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(Subscriber {
        id: "alice".into(),
        active: true,
        filter: adscout::ListingFilter {
            price_max: Some(500),
            ..Default::default()
        },
    });
    harness
        .subscribers
        .write_watch_state(
            &SubscriberId("alice".into()),
            &Watermark {
                last_seen_at: Some(Utc::now() - chrono::Duration::minutes(3)),
                ids_at_last_seen: Vec::new(),
            },
        )
        .await
        .unwrap();

    // harness records all carry price 1000, above the cap
    harness
        .listings
        .append_records(&[record(
            "avito",
            "spb",
            "https://avito.example/pricey",
            Utc::now() - chrono::Duration::seconds(10),
        )])
        .await
        .unwrap();

    let outcome = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Delivered { delivered: 0 });
    assert!(harness.channel.deliveries().is_empty());
}

#[tokio::test]
async fn test_inactive_subscriber_is_skipped() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(subscriber("bob", false));

    let outcome = harness.consumer.handle(&job("bob"), heartbeat()).await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Inactive);
    assert!(!harness.lock.is_held("notify_bob").await.unwrap());
}

#[tokio::test]
async fn test_unknown_subscriber_is_an_error() {
    let harness = NotifyHarness::new();
    let err = harness.consumer.handle(&job("ghost"), heartbeat()).await.unwrap_err();
    assert!(matches!(err, JobError::UnknownSubscriber(_)));
    assert!(!harness.lock.is_held("notify_ghost").await.unwrap());
}

#[tokio::test]
async fn test_locked_subscriber_reports_blocked() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(subscriber("alice", true));
    let _guard = harness
        .lock
        .acquire("notify_alice", Duration::from_secs(60))
        .await
        .unwrap();

    let outcome = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Blocked);
}

#[tokio::test]
async fn test_failed_delivery_does_not_advance_the_watch_state() {
    let harness = NotifyHarness::new();
    harness.subscribers.upsert(subscriber("alice", true));

    let anchor = Utc::now() - chrono::Duration::minutes(3);
    let prior = Watermark {
        last_seen_at: Some(anchor),
        ids_at_last_seen: Vec::new(),
    };
    harness
        .subscribers
        .write_watch_state(&SubscriberId("alice".into()), &prior)
        .await
        .unwrap();
    harness
        .listings
        .append_records(&[record(
            "avito",
            "spb",
            "https://avito.example/1",
            Utc::now() - chrono::Duration::seconds(10),
        )])
        .await
        .unwrap();

    harness.channel.fail_deliveries(true);
    let err = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap_err();
    assert!(matches!(err, JobError::Delivery(_)));
    assert_eq!(
        harness.subscribers.watch_state(&SubscriberId("alice".into())),
        Some(prior)
    );

    // the redelivered job picks the record up once the channel recovers
    harness.channel.fail_deliveries(false);
    let outcome = harness.consumer.handle(&job("alice"), heartbeat()).await.unwrap();
    assert_eq!(outcome, NotifyOutcome::Delivered { delivered: 1 });
}
