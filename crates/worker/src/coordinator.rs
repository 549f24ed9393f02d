//! Pipeline wiring and ordered shutdown.
//!
//! Startup order: geocode cache, enrichment sweeper, batch processor, queue.
//! Shutdown runs the other way so that nothing is handed to a stage that has
//! already stopped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ingest_queue::{Batch, IngestionQueue, PushReceipt, QueueConfig};
use listing_core::{RawListing, Result};
use listing_store::{LifecycleStore, Store};
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::GeocodeCache;
use crate::enrichment::{EnrichmentConfig, EnrichmentSweeper, SweepStats};
use crate::geocoder::GeocodeClient;
use crate::notifications::{NotificationConfig, Notifier};
use crate::processor::{BatchProcessor, ProcessorConfig};

/// Settings for every pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// How often the metrics snapshot is logged; 0 disables
    #[serde(default = "default_metrics_log_interval_secs")]
    pub metrics_log_interval_secs: u64,
    /// How long shutdown waits for queued and in-flight batches
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            processor: ProcessorConfig::default(),
            enrichment: EnrichmentConfig::default(),
            notifications: NotificationConfig::default(),
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// What happens to batches still waiting in the queue at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Deliver everything already queued (within the grace period).
    Drain,
    /// Stop at once; queued batches are dropped and counted.
    Close,
}

/// A running ingestion pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    store: Store,
    lifecycle: Arc<dyn LifecycleStore>,
    queue: Arc<IngestionQueue>,
    processor: Arc<BatchProcessor>,
    sweeper: Arc<EnrichmentSweeper>,
    metrics_task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Wires and starts every stage.
    pub async fn start(
        config: PipelineConfig,
        store: Store,
        lifecycle: Arc<dyn LifecycleStore>,
        geocoder: Arc<dyn GeocodeClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let cache = GeocodeCache::load(
            geocoder,
            store.clone(),
            config.enrichment.min_interval(),
        )
        .await?;

        let sweeper = EnrichmentSweeper::new(
            config.enrichment.clone(),
            store.clone(),
            Arc::new(cache),
            notifier,
        );

        let processor = BatchProcessor::new(config.processor.clone(), lifecycle.clone());
        processor.add_observer(sweeper.clone());

        let queue = IngestionQueue::new(config.queue.clone());
        queue.subscribe(processor.clone());

        sweeper.start();
        processor.start();
        queue.start()?;

        let shutdown = CancellationToken::new();
        let metrics_task = (config.metrics_log_interval_secs > 0).then(|| {
            spawn_metrics_logger(
                Duration::from_secs(config.metrics_log_interval_secs),
                shutdown.clone(),
            )
        });

        info!(
            queue_capacity = config.queue.capacity,
            workers = config.processor.worker_count,
            enrichment = config.enrichment.enabled,
            "Pipeline started"
        );

        Ok(Self {
            config,
            store,
            lifecycle,
            queue,
            processor,
            sweeper,
            metrics_task,
            shutdown,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue(&self) -> &Arc<IngestionQueue> {
        &self.queue
    }

    pub fn sweeper(&self) -> &Arc<EnrichmentSweeper> {
        &self.sweeper
    }

    /// Validates and enqueues raw records. Never waits.
    pub fn push_raw(&self, raws: Vec<RawListing>) -> Result<PushReceipt> {
        self.queue.push_raw(raws)
    }

    /// Enqueues an already validated batch. Never waits.
    pub fn push(&self, batch: Batch) -> Result<()> {
        self.queue.push(batch)
    }

    /// Marks listed properties of `city` missing from `seen_keys` as inactive.
    pub async fn mark_missing(&self, city: &str, seen_keys: &HashSet<String>) -> Result<Vec<String>> {
        self.lifecycle.mark_missing(city, seen_keys).await
    }

    /// Re-enables enrichment for the given properties.
    pub async fn reset_enrichment(&self, identity_keys: &[String]) -> Result<usize> {
        self.sweeper.reset(identity_keys).await
    }

    /// Runs a sweep now and flushes pending notifications.
    pub async fn run_enrichment(&self) -> Result<SweepStats> {
        let stats = self.sweeper.sweep().await?;
        self.sweeper.flush_notifications().await;
        Ok(stats)
    }

    /// Stops every stage, upstream first.
    pub async fn shutdown(mut self, mode: ShutdownMode) {
        let grace = self.config.shutdown_grace();
        info!(?mode, grace_secs = grace.as_secs(), "Pipeline shutting down");

        match mode {
            ShutdownMode::Drain => self.queue.drain(),
            ShutdownMode::Close => self.queue.close(),
        }
        if tokio::time::timeout(grace, self.queue.join()).await.is_err() {
            // Dispatcher is blocked handing a batch to a saturated worker pool.
            warn!("Queue still delivering after grace period, closing");
            self.queue.close();
        }

        self.processor.stop(grace).await;
        self.queue.join().await;
        self.sweeper.stop().await;

        self.shutdown.cancel();
        if let Some(task) = self.metrics_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Metrics logger panicked");
            }
        }

        log_snapshot("Final pipeline metrics");
        info!("Pipeline stopped");
    }
}

fn spawn_metrics_logger(period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => log_snapshot("Pipeline metrics"),
            }
        }
    })
}

fn log_snapshot(message: &str) {
    match serde_json::to_string(&metrics().snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "{}", message),
        Err(e) => warn!(error = %e, "Failed to serialize metrics snapshot"),
    }
}
