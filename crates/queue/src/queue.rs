//! Bounded fan-out queue between crawlers and persistence.
//!
//! `push` never blocks: a full queue returns `QUEUE_001` immediately and the
//! producer decides whether to slow down or drop. A single dispatcher task
//! delivers each batch to every subscriber concurrently and waits for all of
//! them before taking the next batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use listing_core::error::ValidationErrorCode;
use listing_core::{Error, RawListing, Result};
use parking_lot::{Mutex, RwLock};
use telemetry::metrics;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, PushReceipt};
use crate::config::QueueConfig;
use crate::handler::BatchHandler;

/// Multi-producer ingestion queue.
pub struct IngestionQueue {
    config: QueueConfig,
    sender: RwLock<Option<mpsc::Sender<Arc<Batch>>>>,
    receiver: Mutex<Option<mpsc::Receiver<Arc<Batch>>>>,
    handlers: RwLock<Vec<Arc<dyn BatchHandler>>>,
    /// Buffered batches; incremented before a send, decremented on receive.
    depth: AtomicUsize,
    shutdown: CancellationToken,
    /// Cancelled when the dispatcher exits, panics included.
    stopped: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionQueue {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        Arc::new(Self {
            config,
            sender: RwLock::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            handlers: RwLock::new(Vec::new()),
            depth: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            stopped: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Registers a subscriber. Subscribers added after `start` see later batches only.
    pub fn subscribe(&self, handler: Arc<dyn BatchHandler>) {
        info!(handler = handler.name(), "Subscribed to ingestion queue");
        self.handlers.write().push(handler);
    }

    /// Enqueues a validated batch without waiting.
    pub fn push(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Err(Error::validation_code(
                ValidationErrorCode::InvalidField,
                "batch has no records",
            ));
        }
        if batch.len() > self.config.max_batch_records {
            return Err(Error::validation_code(
                ValidationErrorCode::BatchTooLarge,
                format!(
                    "batch has {} records, limit is {}",
                    batch.len(),
                    self.config.max_batch_records
                ),
            ));
        }

        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or_else(Error::queue_closed)?;

        let batch_id = batch.id;
        let records = batch.len();
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let sent = sender.try_send(Arc::new(batch));
        if sent.is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        match sent {
            Ok(()) => {
                let m = metrics();
                m.queue.batches_pushed.inc();
                m.queue_depth.set(depth as u64);
                debug!(batch_id = %batch_id, records, "Batch enqueued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                metrics().queue.batches_backpressured.inc();
                Err(Error::queue_full(sender.max_capacity()))
            }
            Err(TrySendError::Closed(_)) => Err(Error::queue_closed()),
        }
    }

    /// Validates raw crawler output and enqueues the records that pass.
    ///
    /// Nothing is enqueued when every record is rejected. Rejections are
    /// logged and counted only once the push succeeds, so a producer may
    /// resubmit the same records after `QUEUE_001`.
    pub fn push_raw(&self, raws: Vec<RawListing>) -> Result<PushReceipt> {
        if self.is_closed() {
            return Err(Error::queue_closed());
        }
        if raws.len() > self.config.max_batch_records {
            return Err(Error::validation_code(
                ValidationErrorCode::BatchTooLarge,
                format!(
                    "batch has {} records, limit is {}",
                    raws.len(),
                    self.config.max_batch_records
                ),
            ));
        }

        let (batch, rejected) = Batch::from_raw(raws);
        let receipt = if batch.is_empty() {
            PushReceipt {
                batch_id: None,
                accepted: 0,
                rejected,
            }
        } else {
            let batch_id = batch.id;
            let accepted = batch.len();
            self.push(batch)?;
            PushReceipt {
                batch_id: Some(batch_id),
                accepted,
                rejected,
            }
        };

        for r in &receipt.rejected {
            warn!(
                index = r.index,
                identity_key = ?r.identity_key,
                reason = %r.reason,
                "Rejected listing record"
            );
        }
        let m = metrics();
        m.queue.records_rejected.inc_by(receipt.rejected.len() as u64);
        m.queue.records_accepted.inc_by(receipt.accepted as u64);

        Ok(receipt)
    }

    /// Spawns the dispatcher. Fails if called twice.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let rx = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| Error::internal("ingestion queue already started"))?;

        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move { queue.run(rx).await });
        *self.dispatcher.lock() = Some(handle);

        info!(capacity = self.config.capacity, "Ingestion queue started");
        Ok(())
    }

    async fn run(&self, mut rx: mpsc::Receiver<Arc<Batch>>) {
        let _stopped = self.stopped.clone().drop_guard();
        loop {
            let batch = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let depth = self.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            metrics().queue_depth.set(depth as u64);
            self.dispatch(batch).await;
        }

        rx.close();
        let mut dropped = 0u64;
        while let Ok(batch) = rx.try_recv() {
            dropped += 1;
            warn!(
                batch_id = %batch.id,
                records = batch.len(),
                "Dropping unconsumed batch on close"
            );
        }
        self.depth.store(0, Ordering::SeqCst);
        let m = metrics();
        m.queue.batches_dropped_on_close.inc_by(dropped);
        m.queue_depth.set(0);

        info!(dropped, "Ingestion queue dispatcher stopped");
    }

    async fn dispatch(&self, batch: Arc<Batch>) {
        let handlers: Vec<_> = self.handlers.read().clone();
        if handlers.is_empty() {
            warn!(batch_id = %batch.id, "No subscribers, batch discarded");
            return;
        }

        let mut tasks = JoinSet::new();
        for handler in handlers {
            let batch = Arc::clone(&batch);
            tasks.spawn(async move {
                let result = handler.handle(batch).await;
                (handler.name().to_string(), result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    metrics().queue.handler_failures.inc();
                    error!(handler = %name, batch_id = %batch.id, error = %e, "Batch handler failed");
                }
                Err(e) => {
                    metrics().queue.handler_failures.inc();
                    error!(batch_id = %batch.id, error = %e, "Batch handler panicked");
                }
            }
        }
    }

    /// Stops accepting batches and stops delivery after the in-flight batch.
    ///
    /// Batches still buffered are dropped. Safe to call more than once.
    pub fn close(&self) {
        let was_open = self.sender.write().take().is_some();
        self.shutdown.cancel();
        if was_open {
            info!("Ingestion queue closed");
        }
    }

    /// Stops accepting batches but delivers everything already buffered.
    pub fn drain(&self) {
        if self.sender.write().take().is_some() {
            info!("Ingestion queue draining");
        }
    }

    /// Waits for the dispatcher to exit after `close` or `drain`.
    ///
    /// Can be abandoned (e.g. by a timeout) and called again.
    pub async fn join(&self) {
        if self.receiver.lock().is_some() {
            // Never started.
            return;
        }
        self.stopped.cancelled().await;
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Ingestion queue dispatcher panicked");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Batches buffered and not yet dispatched, including while draining.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
