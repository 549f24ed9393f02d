//! Enrichment through the running pipeline.

use std::sync::Arc;
use std::time::Duration;

use integration_tests::fixtures;
use integration_tests::mocks::CountingGeocoder;
use integration_tests::setup::{test_config, wait_for, TestContext};
use listing_core::{NotificationKind, RawListing};
use listing_store::health::init_schema;
use listing_store::{get_property, SqliteLifecycleStore, Store, StoreConfig};

#[tokio::test]
async fn test_inserted_property_enriched_before_notification() {
    let raw = fixtures::listing("A");
    let geocoder =
        CountingGeocoder::new().with_address(&fixtures::address_of(&raw), fixtures::utrecht());
    let ctx = TestContext::with_config(test_config(), geocoder).await;
    // Let the startup sweep finish so the commit below triggers its own run.
    tokio::time::sleep(Duration::from_millis(100)).await;

    ctx.pipeline.push_raw(vec![raw]).unwrap();
    let a = ctx
        .wait_for_property("A", |p| p.enrichment_attempted)
        .await;
    assert_eq!(a.coordinates(), Some(fixtures::utrecht()));

    let notifier = ctx.notifier.clone();
    let sent = wait_for(
        || {
            let notifier = notifier.clone();
            async move { notifier.captured().into_iter().next() }
        },
        |_| true,
    )
    .await;

    assert_eq!(sent.kind, NotificationKind::Inserted);
    assert_eq!(sent.property.coordinates(), Some(fixtures::utrecht()));
    assert_eq!(sent.price_per_sqm, Some(6250.0));
    assert_eq!(sent.district_code.as_deref(), Some("3511"));
    ctx.finish().await;
}

#[tokio::test]
async fn test_failed_lookup_not_repeated_for_same_address() {
    let geocoder = CountingGeocoder::new();
    geocoder.set_unavailable(true);
    let ctx = TestContext::with_config(test_config(), geocoder.clone()).await;

    // Same address, formatted differently.
    let a = fixtures::listing_at("A", "Oudegracht 1", "Utrecht");
    let b = fixtures::listing_at("B", "oudegracht  1", "UTRECHT");
    let address = fixtures::address_of(&a);
    ctx.pipeline.push_raw(vec![a, b]).unwrap();

    ctx.wait_for_property("A", |p| p.enrichment_attempted).await;
    let b = ctx.wait_for_property("B", |p| p.enrichment_attempted).await;
    assert!(b.coordinates().is_none());

    // A later sweep does not go back to the service either.
    ctx.pipeline.run_enrichment().await.unwrap();
    assert_eq!(geocoder.calls_for(&address), 1);
    ctx.finish().await;
}

#[tokio::test]
async fn test_manual_reset_retries_enrichment() {
    let raw = fixtures::listing("A");
    let address = fixtures::address_of(&raw);
    let geocoder = CountingGeocoder::new().with_address(&address, fixtures::utrecht());
    geocoder.set_unavailable(true);
    let ctx = TestContext::with_config(test_config(), geocoder.clone()).await;

    ctx.pipeline.push_raw(vec![raw]).unwrap();
    let a = ctx
        .wait_for_property("A", |p| p.enrichment_attempted)
        .await;
    assert!(a.coordinates().is_none());

    geocoder.set_unavailable(false);
    let reset = ctx
        .pipeline
        .reset_enrichment(&["A".to_string()])
        .await
        .unwrap();
    assert_eq!(reset, 1);

    let a = ctx
        .wait_for_property("A", |p| p.coordinates().is_some())
        .await;
    assert!(a.enrichment_attempted);
    assert_eq!(geocoder.calls_for(&address), 2);
    ctx.finish().await;
}

#[tokio::test]
async fn test_property_without_address_marked_attempted() {
    let geocoder = CountingGeocoder::new();
    let ctx = TestContext::with_config(test_config(), geocoder.clone()).await;

    let raw = RawListing {
        street: None,
        ..fixtures::listing("A")
    };
    ctx.pipeline.push_raw(vec![raw]).unwrap();

    let a = ctx
        .wait_for_property("A", |p| p.enrichment_attempted)
        .await;
    assert!(a.coordinates().is_none());
    assert_eq!(geocoder.call_count(), 0);
    ctx.finish().await;
}

#[tokio::test]
async fn test_restart_resumes_from_persisted_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_url(format!(
        "sqlite:{}?mode=rwc",
        dir.path().join("listings.db").display()
    ));
    let raw = fixtures::listing("A");
    let address = fixtures::address_of(&raw);

    // First run: ingest with enrichment off, so A is left unattempted.
    {
        let store = Store::connect(&config).await.unwrap();
        init_schema(&store).await.unwrap();
        let mut pipeline_config = test_config();
        pipeline_config.enrichment.enabled = false;
        let lifecycle = Arc::new(SqliteLifecycleStore::new(store.clone()));
        let ctx = TestContext::with_lifecycle(
            pipeline_config,
            store,
            lifecycle,
            CountingGeocoder::new(),
        )
        .await;

        ctx.pipeline.push_raw(vec![raw.clone()]).unwrap();
        let (store, _) = ctx.finish().await;
        let a = get_property(&store, "A").await.unwrap().unwrap();
        assert!(!a.enrichment_attempted);
        store.close().await;
    }

    // Second run: the startup sweep picks A up.
    let geocoder = CountingGeocoder::new().with_address(&address, fixtures::utrecht());
    let store = Store::connect(&config).await.unwrap();
    init_schema(&store).await.unwrap();
    let lifecycle = Arc::new(SqliteLifecycleStore::new(store.clone()));
    let ctx = TestContext::with_lifecycle(test_config(), store, lifecycle, geocoder.clone()).await;

    let a = ctx
        .wait_for_property("A", |p| p.coordinates().is_some())
        .await;
    assert!(a.enrichment_attempted);
    let (store, _) = ctx.finish().await;
    store.close().await;

    // Third run: the cached coordinates survive, nothing is left to look up.
    let geocoder = CountingGeocoder::new();
    let store = Store::connect(&config).await.unwrap();
    let lifecycle = Arc::new(SqliteLifecycleStore::new(store.clone()));
    let ctx = TestContext::with_lifecycle(test_config(), store, lifecycle, geocoder.clone()).await;
    ctx.pipeline.run_enrichment().await.unwrap();
    ctx.finish().await;
    assert_eq!(geocoder.call_count(), 0);
}
