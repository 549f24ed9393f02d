//! End-to-end tests for the ingestion pipeline.
//!
//! Raw listings → IngestionQueue → BatchProcessor → SQLite lifecycle store,
//! with a mock geocoder and a capturing notifier.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use integration_tests::mocks::{CountingGeocoder, FlakyLifecycleStore};
use integration_tests::setup::{memory_store, test_config, TestContext};
use integration_tests::fixtures;
use listing_core::{NotificationKind, PropertyStatus};
use listing_store::health::check_connection;
use listing_store::{get_property, history_for, SqliteLifecycleStore};
use telemetry::{health, metrics, HealthStatus};
use worker::ShutdownMode;

#[tokio::test]
async fn test_republish_after_mark_missing_e2e() {
    let ctx = TestContext::new().await;

    ctx.pipeline
        .push_raw(vec![fixtures::listing_with_price("A", 500_000)])
        .expect("push failed");
    let a = ctx
        .wait_for_property("A", |p| p.status == PropertyStatus::Active)
        .await;
    assert_eq!(a.republish_count, 0);
    assert_eq!(a.living_area, Some(80));
    assert_eq!(history_for(&ctx.store, "A").await.unwrap().len(), 1);

    let changed = ctx
        .pipeline
        .mark_missing("Utrecht", &HashSet::new())
        .await
        .expect("mark_missing failed");
    assert_eq!(changed, vec!["A".to_string()]);
    let a = get_property(&ctx.store, "A").await.unwrap().unwrap();
    assert_eq!(a.status, PropertyStatus::Inactive);

    ctx.pipeline
        .push_raw(vec![fixtures::listing_with_price("A", 520_000)])
        .expect("push failed");
    let a = ctx
        .wait_for_property("A", |p| p.status == PropertyStatus::Republished)
        .await;

    assert_eq!(a.republish_count, 1);
    assert_eq!(a.price, Some(520_000));
    assert_eq!(history_for(&ctx.store, "A").await.unwrap().len(), 2);

    let (_, notifier) = ctx.finish().await;
    let kinds: Vec<_> = notifier.captured().iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![NotificationKind::Inserted, NotificationKind::Republished]
    );
}

#[tokio::test]
async fn test_malformed_records_rejected_rest_persisted() {
    let ctx = TestContext::new().await;

    let receipt = ctx
        .pipeline
        .push_raw(vec![
            fixtures::listing("A"),
            fixtures::keyless_listing(),
            fixtures::listing("B"),
        ])
        .expect("push failed");

    assert_eq!(receipt.accepted, 2);
    assert_eq!(receipt.rejected.len(), 1);
    assert_eq!(receipt.rejected[0].index, 1);
    assert_eq!(receipt.rejected[0].code, Some("VALID_001"));

    let (store, _) = ctx.finish().await;
    assert!(get_property(&store, "A").await.unwrap().is_some());
    assert!(get_property(&store, "B").await.unwrap().is_some());
}

#[tokio::test]
async fn test_only_keyless_records_enqueue_nothing() {
    let ctx = TestContext::new().await;

    let receipt = ctx
        .pipeline
        .push_raw(vec![fixtures::keyless_listing()])
        .expect("push failed");

    assert_eq!(receipt.accepted, 0);
    assert!(receipt.batch_id.is_none());
    ctx.finish().await;
}

#[tokio::test]
async fn test_transient_store_errors_retried() {
    let store = memory_store().await;
    let flaky = Arc::new(FlakyLifecycleStore::new(
        SqliteLifecycleStore::new(store.clone()),
        2,
    ));
    let ctx =
        TestContext::with_lifecycle(test_config(), store, flaky.clone(), CountingGeocoder::new())
            .await;

    ctx.pipeline
        .push_raw(vec![fixtures::listing("A")])
        .expect("push failed");
    ctx.wait_for_property("A", |_| true).await;

    assert_eq!(flaky.attempts(), 3);
    assert_eq!(history_for(&ctx.store, "A").await.unwrap().len(), 1);
    ctx.finish().await;
}

#[tokio::test]
async fn test_batch_dropped_after_max_attempts() {
    let store = memory_store().await;
    let flaky = Arc::new(FlakyLifecycleStore::new(
        SqliteLifecycleStore::new(store.clone()),
        100,
    ));
    let mut config = test_config();
    config.processor.max_attempts = 2;
    let ctx =
        TestContext::with_lifecycle(config, store, flaky.clone(), CountingGeocoder::new()).await;

    ctx.pipeline
        .push_raw(vec![fixtures::listing("A")])
        .expect("push failed");
    let (store, notifier) = ctx.finish().await;

    assert_eq!(flaky.attempts(), 2);
    assert!(get_property(&store, "A").await.unwrap().is_none());
    assert_eq!(notifier.count(), 0);
}

#[tokio::test]
async fn test_backpressure_surfaces_queue_full() {
    let store = memory_store().await;
    // Never commits, and the single worker sits in a long backoff.
    let flaky = Arc::new(FlakyLifecycleStore::new(
        SqliteLifecycleStore::new(store.clone()),
        usize::MAX,
    ));
    let mut config = test_config();
    config.queue.capacity = 1;
    config.processor.worker_count = 1;
    config.processor.retry_delay_ms = 60_000;
    config.shutdown_grace_secs = 1;
    let ctx = TestContext::with_lifecycle(config, store, flaky, CountingGeocoder::new()).await;

    let mut saw_full = false;
    for i in 0..20 {
        match ctx.pipeline.push_raw(vec![fixtures::listing(&format!("K{}", i))]) {
            Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            Err(e) => {
                assert!(e.is_queue_full(), "unexpected error: {}", e);
                assert_eq!(e.error_code(), Some("QUEUE_001"));
                saw_full = true;
                break;
            }
        }
    }
    assert!(saw_full, "queue never reported backpressure");

    let started = tokio::time::Instant::now();
    ctx.pipeline.shutdown(ShutdownMode::Close).await;
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_notifications_only_for_inserted_and_republished() {
    let ctx = TestContext::new().await;

    ctx.pipeline
        .push_raw(vec![fixtures::listing("A"), fixtures::listing("B")])
        .unwrap();
    ctx.wait_for_property("B", |_| true).await;

    // Re-sighting and sale are not announced.
    ctx.pipeline
        .push_raw(vec![fixtures::listing("A"), fixtures::sold_listing("B")])
        .unwrap();
    ctx.wait_for_property("B", |p| p.status == PropertyStatus::Sold)
        .await;

    let seen: HashSet<String> = ["B".to_string()].into_iter().collect();
    ctx.pipeline.mark_missing("Utrecht", &seen).await.unwrap();

    ctx.pipeline.push_raw(vec![fixtures::listing("A")]).unwrap();
    ctx.wait_for_property("A", |p| p.status == PropertyStatus::Republished)
        .await;

    let (_, notifier) = ctx.finish().await;
    let captured = notifier.captured();
    let inserted = captured
        .iter()
        .filter(|n| n.kind == NotificationKind::Inserted)
        .count();
    let republished: Vec<_> = captured
        .iter()
        .filter(|n| n.kind == NotificationKind::Republished)
        .collect();

    assert_eq!(inserted, 2);
    assert_eq!(republished.len(), 1);
    assert_eq!(republished[0].property.identity_key, "A");
    assert_eq!(republished[0].property.republish_count, 1);
}

#[tokio::test]
async fn test_failing_notifier_does_not_affect_ingestion() {
    let ctx = TestContext::new().await;
    ctx.notifier.set_should_fail(true);

    ctx.pipeline.push_raw(vec![fixtures::listing("A")]).unwrap();
    ctx.wait_for_property("A", |_| true).await;
    ctx.pipeline.push_raw(vec![fixtures::listing("B")]).unwrap();

    let (store, notifier) = ctx.finish().await;
    assert!(get_property(&store, "B").await.unwrap().is_some());
    assert_eq!(notifier.count(), 2);
}

#[tokio::test]
async fn test_health_and_commit_metrics_reported() {
    let ctx = TestContext::new().await;
    assert!(check_connection(&ctx.store).await);
    assert!(health().is_ready());
    // The mock geocoder never touches the registry.
    assert_ne!(health().report().status, HealthStatus::Unhealthy);

    // Counters are process-wide and other tests commit concurrently.
    let committed_before = metrics().processor.batches_committed.get();
    let inserted_before = metrics().lifecycle.inserted.get();

    ctx.pipeline
        .push_raw(fixtures::listings("metrics", 3))
        .expect("push failed");
    ctx.finish().await;

    let snapshot = metrics().snapshot();
    assert!(snapshot.processor.batches_committed > committed_before);
    assert!(snapshot.lifecycle.inserted >= inserted_before + 3);
    assert!(snapshot.commit_latency.count >= 1);
}
