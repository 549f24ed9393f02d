//! Mock implementations for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ingest_queue::Batch;
use listing_core::error::DbErrorCode;
use listing_core::{AddressQuery, Coordinates, Error, PropertyNotification, Result};
use listing_store::{BatchOutcome, LifecycleStore, SqliteLifecycleStore};
use parking_lot::Mutex;
use worker::{GeocodeClient, Notifier};

/// Geocoder answering from a fixed table and counting every call.
///
/// Addresses not in the table resolve to "not found". Lookups are keyed by
/// `AddressQuery::cache_key`.
#[derive(Default)]
pub struct CountingGeocoder {
    known: Mutex<HashMap<String, Coordinates>>,
    calls: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl CountingGeocoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_address(self: Arc<Self>, address: &AddressQuery, at: Coordinates) -> Arc<Self> {
        self.known.lock().insert(address.cache_key(), at);
        self
    }

    /// Simulate a transport failure on every call.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls made for one address.
    pub fn calls_for(&self, address: &AddressQuery) -> usize {
        let key = address.cache_key();
        self.calls.lock().iter().filter(|k| **k == key).count()
    }
}

#[async_trait]
impl GeocodeClient for CountingGeocoder {
    async fn geocode(&self, address: &AddressQuery) -> Result<Option<Coordinates>> {
        let key = address.cache_key();
        self.calls.lock().push(key.clone());

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::geocoding("service unavailable"));
        }
        Ok(self.known.lock().get(&key).copied())
    }
}

/// Notifier capturing every notification in memory.
#[derive(Clone, Default)]
pub struct CapturingNotifier {
    sent: Arc<Mutex<Vec<PropertyNotification>>>,
    should_fail: Arc<AtomicBool>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<PropertyNotification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Captures, then reports failure (the notification still counts as seen).
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn notify(&self, notification: &PropertyNotification) -> Result<()> {
        self.sent.lock().push(notification.clone());
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(Error::notification("mock notifier failure"));
        }
        Ok(())
    }
}

/// Lifecycle store failing the first `failures` batches with a busy error,
/// then delegating to SQLite.
pub struct FlakyLifecycleStore {
    inner: SqliteLifecycleStore,
    remaining_failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyLifecycleStore {
    pub fn new(inner: SqliteLifecycleStore, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Total `apply_batch` calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LifecycleStore for FlakyLifecycleStore {
    async fn apply_batch(&self, batch: &Batch) -> Result<BatchOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::database(DbErrorCode::Busy, "database is locked"));
        }
        self.inner.apply_batch(batch).await
    }

    async fn mark_missing(&self, city: &str, seen_keys: &HashSet<String>) -> Result<Vec<String>> {
        self.inner.mark_missing(city, seen_keys).await
    }
}
