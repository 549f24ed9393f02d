//! Batch processor: persists queued batches with bounded retries.
//!
//! The processor subscribes to the ingestion queue as a single handler that
//! forwards each batch into a bounded work channel. `worker_count` workers
//! drain that channel, so each batch is persisted exactly once and a saturated
//! pool pushes back on the queue.
//!
//! Per batch:
//! 1. Apply all records in one store transaction
//! 2. On failure, wait according to the backoff policy and retry
//! 3. After `max_attempts`, log the batch contents and move on

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ingest_queue::{Batch, BatchHandler};
use listing_core::{Error, Result};
use listing_store::{BatchOutcome, LifecycleStore};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `retry_delay * attempt`
    #[default]
    Linear,
    /// `retry_delay`
    Fixed,
    /// `retry_delay * 2^(attempt - 1)`
    Exponential,
}

impl Backoff {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Linear => base.saturating_mul(attempt),
            Self::Fixed => base,
            Self::Exponential => base.saturating_mul(1u32 << (attempt - 1).min(16)),
        }
    }
}

/// Batch processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Concurrent batch workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Attempts per batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry delay in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_worker_count() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff: Backoff::default(),
        }
    }
}

impl ProcessorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Told about every committed batch. Called on the worker task; must not block.
pub trait CommitObserver: Send + Sync {
    fn batch_committed(&self, outcome: &BatchOutcome);
}

/// Pool of workers applying batches to the lifecycle store.
pub struct BatchProcessor {
    config: ProcessorConfig,
    store: Arc<dyn LifecycleStore>,
    observers: RwLock<Vec<Arc<dyn CommitObserver>>>,
    work_tx: RwLock<Option<mpsc::Sender<Arc<Batch>>>>,
    work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Batch>>>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchProcessor {
    pub fn new(config: ProcessorConfig, store: Arc<dyn LifecycleStore>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.worker_count.max(1));
        Arc::new(Self {
            config,
            store,
            observers: RwLock::new(Vec::new()),
            work_tx: RwLock::new(Some(tx)),
            work_rx: Arc::new(tokio::sync::Mutex::new(rx)),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn add_observer(&self, observer: Arc<dyn CommitObserver>) {
        self.observers.write().push(observer);
    }

    /// Spawns `worker_count` workers.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.worker_count.max(1) {
            let processor = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                processor.run_worker(worker_id).await;
            }));
        }

        info!(
            workers = workers.len(),
            max_attempts = self.config.max_attempts,
            backoff = ?self.config.backoff,
            "Batch processor started"
        );
    }

    async fn run_worker(&self, worker_id: usize) {
        loop {
            let next = {
                let mut rx = self.work_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => None,
                    batch = rx.recv() => batch,
                }
            };

            match next {
                Some(batch) => self.process(worker_id, batch).await,
                None => break,
            }
        }
        debug!(worker_id, "Batch worker stopped");
    }

    /// Persists one batch, retrying until it commits or attempts run out.
    pub async fn process(&self, worker_id: usize, batch: Arc<Batch>) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            let err = match self.store.apply_batch(&batch).await {
                Ok(outcome) => {
                    let m = metrics();
                    m.processor.batches_committed.inc();
                    m.commit_latency
                        .record(started.elapsed().as_millis() as u64);
                    debug!(
                        worker_id,
                        batch_id = %batch.id,
                        records = batch.len(),
                        attempt,
                        "Batch persisted"
                    );

                    let observers: Vec<_> = self.observers.read().clone();
                    for observer in observers {
                        observer.batch_committed(&outcome);
                    }
                    return;
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                abandon(&batch, attempt, &err);
                return;
            }

            let delay = self.config.backoff.delay(self.config.retry_delay(), attempt);
            metrics().processor.batch_retries.inc();
            if err.is_transient() {
                warn!(
                    worker_id,
                    batch_id = %batch.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Store busy, retrying batch"
                );
            } else {
                error!(
                    worker_id,
                    batch_id = %batch.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Batch failed, retrying"
                );
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    abandon(&batch, attempt, &Error::shutdown("interrupted during retry backoff"));
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Stops taking work and waits up to `grace` for in-flight batches.
    ///
    /// Workers still running after `grace` are interrupted at their next
    /// backoff sleep.
    pub async fn stop(&self, grace: Duration) {
        self.work_tx.write().take();

        let mut handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        if tokio::time::timeout(grace, join_workers(&mut handles))
            .await
            .is_err()
        {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Batch workers still busy, interrupting retries"
            );
            self.shutdown.cancel();
            join_workers(&mut handles).await;
        }
        self.shutdown.cancel();

        let mut rx = self.work_rx.lock().await;
        while let Ok(batch) = rx.try_recv() {
            abandon(&batch, 0, &Error::shutdown("processor stopped before batch started"));
        }

        info!("Batch processor stopped");
    }
}

#[async_trait]
impl BatchHandler for BatchProcessor {
    fn name(&self) -> &str {
        "batch-processor"
    }

    /// Waits for a free slot in the work channel.
    async fn handle(&self, batch: Arc<Batch>) -> Result<()> {
        let sender = self.work_tx.read().clone();
        let Some(sender) = sender else {
            abandon(&batch, 0, &Error::shutdown("batch processor stopped"));
            return Err(Error::shutdown("batch processor stopped"));
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                abandon(&batch, 0, &Error::shutdown("batch processor stopped"));
                Err(Error::shutdown("batch processor stopped"))
            }
            permit = sender.reserve() => match permit {
                Ok(permit) => {
                    permit.send(batch);
                    Ok(())
                }
                Err(_) => {
                    abandon(&batch, 0, &Error::shutdown("work channel closed"));
                    Err(Error::shutdown("work channel closed"))
                }
            },
        }
    }
}

/// Awaits workers from the back so that a timed-out wait can be resumed.
async fn join_workers(handles: &mut Vec<JoinHandle<()>>) {
    while let Some(handle) = handles.last_mut() {
        if let Err(e) = handle.await {
            error!(error = %e, "Batch worker panicked");
        }
        handles.pop();
    }
}

/// Logs a batch that will not be persisted, with its records for manual replay.
fn abandon(batch: &Batch, attempts: u32, reason: &Error) {
    metrics().processor.batches_failed.inc();
    let records = serde_json::to_string(&batch.records)
        .unwrap_or_else(|e| format!("<unserializable batch: {}>", e));
    error!(
        batch_id = %batch.id,
        attempts,
        error = %reason,
        records = %records,
        "Batch permanently failed"
    );
}
