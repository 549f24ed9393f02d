//! Lifecycle properties exercised through the queue boundary.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate, Utc};
use ingest_queue::Batch;
use integration_tests::fixtures;
use integration_tests::mocks::CountingGeocoder;
use integration_tests::setup::{memory_store, test_config, TestContext};
use listing_core::{PropertyStatus, RawListing};
use listing_store::{
    count_by_status, get_property, history_for, LifecycleStore, SqliteLifecycleStore,
};

fn batch(raws: Vec<RawListing>) -> Batch {
    let (batch, rejected) = Batch::from_raw(raws);
    assert!(rejected.is_empty(), "fixture rejected: {:?}", rejected);
    batch
}

#[tokio::test]
async fn test_history_counts_every_ingestion() {
    let store = memory_store().await;
    let lifecycle = SqliteLifecycleStore::new(store.clone());

    for _ in 0..5 {
        lifecycle
            .apply_batch(&batch(vec![fixtures::listing("A")]))
            .await
            .unwrap();
    }

    let a = get_property(&store, "A").await.unwrap().unwrap();
    assert_eq!(a.status, PropertyStatus::Active);
    assert_eq!(a.republish_count, 0);
    assert_eq!(history_for(&store, "A").await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_sold_then_relisted_is_republished() {
    let store = memory_store().await;
    let lifecycle = SqliteLifecycleStore::new(store.clone());
    let first_seen = Utc::now() - Duration::days(30);

    lifecycle
        .apply_batch(&batch(vec![fixtures::observed(
            fixtures::listing("A"),
            first_seen,
        )]))
        .await
        .unwrap();
    lifecycle
        .apply_batch(&batch(vec![fixtures::sold_listing("A")]))
        .await
        .unwrap();

    let sold = get_property(&store, "A").await.unwrap().unwrap();
    assert_eq!(sold.status, PropertyStatus::Sold);
    // No sale date in the record: falls back to the observation date.
    assert_eq!(sold.selling_date, Some(sold.observed_at.date_naive()));

    lifecycle
        .apply_batch(&batch(vec![fixtures::listing("A")]))
        .await
        .unwrap();

    let relisted = get_property(&store, "A").await.unwrap().unwrap();
    assert_eq!(relisted.status, PropertyStatus::Republished);
    assert_eq!(relisted.republish_count, 1);
    assert_eq!(relisted.selling_date, None);

    let history = history_for(&store, "A").await.unwrap();
    let statuses: Vec<_> = history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![
            PropertyStatus::Active,
            PropertyStatus::Sold,
            PropertyStatus::Republished
        ]
    );
}

#[tokio::test]
async fn test_explicit_sale_date_kept() {
    let store = memory_store().await;
    let lifecycle = SqliteLifecycleStore::new(store.clone());
    let sold_on = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

    let raw = RawListing {
        selling_date: Some(sold_on),
        ..fixtures::sold_listing("A")
    };
    lifecycle.apply_batch(&batch(vec![raw])).await.unwrap();

    let a = get_property(&store, "A").await.unwrap().unwrap();
    assert_eq!(a.status, PropertyStatus::Sold);
    assert_eq!(a.selling_date, Some(sold_on));
}

#[tokio::test]
async fn test_mark_missing_is_scoped_to_city() {
    let store = memory_store().await;
    let lifecycle = SqliteLifecycleStore::new(store.clone());

    lifecycle
        .apply_batch(&batch(vec![
            fixtures::listing_at("U1", "Oudegracht 1", "Utrecht"),
            fixtures::listing_at("U2", "Oudegracht 2", "Utrecht"),
            fixtures::listing_at("L1", "Breestraat 1", "Leiden"),
        ]))
        .await
        .unwrap();

    let seen: HashSet<String> = ["U2".to_string()].into_iter().collect();
    let changed = lifecycle.mark_missing("utrecht", &seen).await.unwrap();
    assert_eq!(changed, vec!["U1".to_string()]);

    let counts = count_by_status(&store).await.unwrap();
    assert_eq!(counts[&PropertyStatus::Active], 2);
    assert_eq!(counts[&PropertyStatus::Inactive], 1);

    // Running it again changes nothing.
    assert!(lifecycle.mark_missing("Utrecht", &seen).await.unwrap().is_empty());
    // No history for the inactivation itself.
    assert_eq!(history_for(&store, "U1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_living_area_stored_as_unknown() {
    let store = memory_store().await;
    let lifecycle = SqliteLifecycleStore::new(store.clone());

    let raw = RawListing {
        living_area: Some(0),
        ..fixtures::listing("A")
    };
    lifecycle.apply_batch(&batch(vec![raw])).await.unwrap();

    let a = get_property(&store, "A").await.unwrap().unwrap();
    assert_eq!(a.living_area, None);
    assert_eq!(a.price_per_sqm(), None);
}

#[tokio::test]
async fn test_unknown_year_built_keeps_the_sighting() {
    let store = memory_store().await;
    let lifecycle = SqliteLifecycleStore::new(store.clone());

    let raw = RawListing {
        year_built: Some(0),
        num_rooms: Some(-1),
        ..fixtures::listing("A")
    };
    lifecycle.apply_batch(&batch(vec![raw])).await.unwrap();

    let a = get_property(&store, "A").await.unwrap().unwrap();
    assert_eq!(a.year_built, None);
    assert_eq!(a.num_rooms, None);
    assert_eq!(a.price, Some(500_000));
    assert_eq!(history_for(&store, "A").await.unwrap().len(), 1);
}

/// Concurrent workers upserting the same key are serialized by the store's
/// write lock: nothing is lost and history stays complete.
#[tokio::test]
async fn test_same_key_across_concurrent_batches() {
    let mut config = test_config();
    config.processor.worker_count = 4;
    let ctx = TestContext::with_config(config, CountingGeocoder::new()).await;

    for i in 0..10 {
        ctx.pipeline
            .push_raw(vec![
                fixtures::listing_with_price("X", 400_000 + i),
                fixtures::listing(&format!("Y{}", i)),
            ])
            .expect("push failed");
    }

    let (store, _) = ctx.finish().await;
    let x = get_property(&store, "X").await.unwrap().unwrap();
    assert_eq!(x.status, PropertyStatus::Active);
    assert_eq!(x.republish_count, 0);
    assert_eq!(history_for(&store, "X").await.unwrap().len(), 10);
    assert_eq!(count_by_status(&store).await.unwrap()[&PropertyStatus::Active], 11);
}
