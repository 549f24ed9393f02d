//! Common test setup functions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use listing_core::PropertyRecord;
use listing_store::health::init_schema;
use listing_store::{get_property, LifecycleStore, SqliteLifecycleStore, Store};
use worker::{EnrichmentConfig, Pipeline, PipelineConfig, ProcessorConfig, ShutdownMode};

use crate::mocks::{CapturingNotifier, CountingGeocoder};

/// Pipeline settings for tests: no real rate limiting, fast retries, no
/// periodic sweep or metrics logging.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        processor: ProcessorConfig {
            worker_count: 2,
            max_attempts: 3,
            retry_delay_ms: 10,
            ..Default::default()
        },
        enrichment: EnrichmentConfig {
            min_interval_ms: 1,
            sweep_interval_secs: 3600,
            ..Default::default()
        },
        metrics_log_interval_secs: 0,
        shutdown_grace_secs: 5,
        ..Default::default()
    }
}

/// Fresh in-memory store with the schema applied.
pub async fn memory_store() -> Store {
    let store = Store::in_memory()
        .await
        .expect("Failed to open in-memory store");
    init_schema(&store)
        .await
        .expect("Failed to initialize schema");
    store
}

/// Running pipeline over an in-memory store with mock collaborators.
pub struct TestContext {
    pub store: Store,
    pub geocoder: Arc<CountingGeocoder>,
    pub notifier: CapturingNotifier,
    pub pipeline: Pipeline,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config(), CountingGeocoder::new()).await
    }

    pub async fn with_config(config: PipelineConfig, geocoder: Arc<CountingGeocoder>) -> Self {
        let store = memory_store().await;
        let lifecycle = Arc::new(SqliteLifecycleStore::new(store.clone()));
        Self::with_lifecycle(config, store, lifecycle, geocoder).await
    }

    /// Pipeline over a custom lifecycle store sharing `store`.
    pub async fn with_lifecycle(
        config: PipelineConfig,
        store: Store,
        lifecycle: Arc<dyn LifecycleStore>,
        geocoder: Arc<CountingGeocoder>,
    ) -> Self {
        let notifier = CapturingNotifier::new();
        let pipeline = Pipeline::start(
            config,
            store.clone(),
            lifecycle,
            geocoder.clone(),
            Arc::new(notifier.clone()),
        )
        .await
        .expect("Failed to start pipeline");

        Self {
            store,
            geocoder,
            notifier,
            pipeline,
        }
    }

    /// Waits until `key` is persisted and satisfies `check`.
    pub async fn wait_for_property<F>(&self, key: &str, check: F) -> PropertyRecord
    where
        F: Fn(&PropertyRecord) -> bool,
    {
        let store = self.store.clone();
        let key = key.to_string();
        let probe = || {
            let store = store.clone();
            let key = key.clone();
            async move { get_property(&store, &key).await.ok().flatten() }
        };
        wait_for(probe, check).await
    }

    /// Drains the queue and stops every stage. Returns the store for checks.
    pub async fn finish(self) -> (Store, CapturingNotifier) {
        self.pipeline.shutdown(ShutdownMode::Drain).await;
        (self.store, self.notifier)
    }
}

/// Polls `probe` every 10ms until it yields a value accepted by `accept`.
///
/// Panics after 5 seconds.
pub async fn wait_for<T, P, Fut, A>(mut probe: P, accept: A) -> T
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
    A: Fn(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = probe().await {
            if accept(&value) {
                return value;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
