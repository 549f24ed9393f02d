//! Background enrichment sweep and notification dispatch.
//!
//! The sweeper is woken after every committed batch, at startup, and on a
//! fixed interval. Each sweep walks properties that have no coordinates and
//! were never attempted, in sub-batches of `batch_size`:
//! 1. Resolve each address through the geocode cache (outside any transaction)
//! 2. Apply the sub-batch's results in one transaction
//!
//! After a sweep, properties inserted or republished since the last run are
//! reloaded and handed to the notifier with whatever coordinates they now have.

use std::sync::Arc;
use std::time::Duration;

use listing_core::{AddressQuery, NotificationKind, PropertyNotification, PropertyRecord, Result};
use listing_store::{
    apply_enrichment, awaiting_enrichment, get_property, reset_enrichment, BatchOutcome,
    EnrichmentUpdate, Store,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::GeocodeCache;
use crate::notifications::Notifier;
use crate::processor::CommitObserver;

/// Enrichment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Geocode at all; notifications are sent either way
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Properties per enrichment transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Minimum gap between outbound geocoder calls
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Periodic sweep in addition to commit-triggered ones
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_batch_size() -> u32 {
    10
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            batch_size: default_batch_size(),
            min_interval_ms: default_min_interval_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl EnrichmentConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub examined: usize,
    pub enriched: usize,
    pub without_coordinates: usize,
    /// Candidates whose address changed before their result was applied
    pub skipped: usize,
}

#[derive(Debug, Clone)]
struct PendingNotification {
    kind: NotificationKind,
    property: PropertyRecord,
}

/// Supervised enrichment task.
pub struct EnrichmentSweeper {
    config: EnrichmentConfig,
    store: Store,
    cache: Arc<GeocodeCache>,
    notifier: Arc<dyn Notifier>,
    pending: Mutex<Vec<PendingNotification>>,
    wake: Notify,
    shutdown: CancellationToken,
    sweep_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Address to geocode, if the property has enough of one.
fn address_of(property: &PropertyRecord) -> Option<AddressQuery> {
    let street = property.street.as_deref().filter(|s| !s.trim().is_empty())?;
    let city = property.city.as_deref().filter(|s| !s.trim().is_empty())?;
    Some(AddressQuery::new(
        street,
        property.postal_code.as_deref().unwrap_or_default(),
        city,
    ))
}

impl EnrichmentSweeper {
    pub fn new(
        config: EnrichmentConfig,
        store: Store,
        cache: Arc<GeocodeCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            cache,
            notifier,
            pending: Mutex::new(Vec::new()),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            sweep_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EnrichmentConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<GeocodeCache> {
        &self.cache
    }

    pub fn pending_notifications(&self) -> usize {
        self.pending.lock().len()
    }

    /// Spawns the sweep loop. The first run happens immediately, which picks
    /// up anything left unattempted by a previous process.
    pub fn start(self: &Arc<Self>) {
        let sweeper = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sweeper.run().await;
        });
        *self.task.lock() = Some(handle);

        info!(
            enabled = self.config.enabled,
            batch_size = self.config.batch_size,
            min_interval_ms = self.config.min_interval_ms,
            sweep_interval_secs = self.config.sweep_interval_secs,
            "Enrichment sweeper started"
        );
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = ticker.tick() => {}
            }
            self.run_once().await;
        }

        // Nothing committed before shutdown goes unannounced.
        self.flush_notifications().await;
        debug!("Enrichment sweeper stopped");
    }

    async fn run_once(&self) {
        match self.sweep().await {
            Ok(stats) if stats.examined > 0 => info!(
                examined = stats.examined,
                enriched = stats.enriched,
                without_coordinates = stats.without_coordinates,
                skipped = stats.skipped,
                "Enrichment sweep finished"
            ),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Enrichment sweep failed"),
        }
        self.flush_notifications().await;
    }

    /// Requests a sweep soon. Calls made while a sweep is queued coalesce.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Enriches every property awaiting coordinates.
    ///
    /// Sweeps never overlap. A shutdown stops the sweep between lookups; the
    /// in-flight sub-batch is then left for the next process.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let _running = self.sweep_lock.lock().await;
        let mut stats = SweepStats::default();
        if !self.config.enabled {
            return Ok(stats);
        }
        metrics().enrichment.sweeps.inc();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let candidates = awaiting_enrichment(&self.store, self.config.batch_size.max(1)).await?;
            if candidates.is_empty() {
                break;
            }

            let mut updates = Vec::with_capacity(candidates.len());
            for property in &candidates {
                let coordinates = match address_of(property) {
                    Some(address) => {
                        tokio::select! {
                            biased;
                            _ = self.shutdown.cancelled() => return Ok(stats),
                            found = self.cache.lookup(&address) => found?,
                        }
                    }
                    None => {
                        debug!(identity_key = %property.identity_key, "No address to geocode");
                        None
                    }
                };
                updates.push(EnrichmentUpdate::for_property(property, coordinates));
            }

            let applied = apply_enrichment(&self.store, &updates).await? as usize;
            let found = updates.iter().filter(|u| u.coordinates.is_some()).count();

            stats.examined += candidates.len();
            stats.enriched += found;
            stats.without_coordinates += updates.len() - found;
            stats.skipped += updates.len().saturating_sub(applied);
            metrics().enrichment.properties_enriched.inc_by(found as u64);

            if applied == 0 {
                // Every candidate moved under us; the next sweep picks them up.
                break;
            }
        }

        Ok(stats)
    }

    /// Sends queued notifications with the latest stored state.
    pub async fn flush_notifications(&self) {
        let pending: Vec<_> = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return;
        }

        let m = metrics();
        for item in pending {
            let key = item.property.identity_key.clone();
            let property = match get_property(&self.store, &key).await {
                Ok(Some(current)) => current,
                Ok(None) => item.property,
                Err(e) => {
                    warn!(identity_key = %key, error = %e, "Reload failed, notifying with committed snapshot");
                    item.property
                }
            };

            let notification = PropertyNotification::new(item.kind, property);
            match self.notifier.notify(&notification).await {
                Ok(()) => m.notifications.sent.inc(),
                Err(e) => {
                    m.notifications.failed.inc();
                    warn!(identity_key = %key, kind = ?item.kind, error = %e, "Notification failed");
                }
            }
        }
    }

    /// Clears coordinates and cached failures for `identity_keys` and wakes
    /// the sweeper. Returns how many properties were reset.
    pub async fn reset(&self, identity_keys: &[String]) -> Result<usize> {
        let reset = reset_enrichment(&self.store, identity_keys).await?;
        let cache_keys: Vec<String> = reset
            .iter()
            .filter_map(address_of)
            .map(|address| address.cache_key())
            .collect();
        self.cache.forget_failures(&cache_keys).await?;

        info!(properties = reset.len(), "Enrichment reset");
        self.trigger();
        Ok(reset.len())
    }

    /// Stops the loop and waits for it, including the final notification flush.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Enrichment sweeper panicked");
            }
        }
        info!("Enrichment sweeper stopped");
    }
}

impl CommitObserver for EnrichmentSweeper {
    fn batch_committed(&self, outcome: &BatchOutcome) {
        {
            let mut pending = self.pending.lock();
            for change in outcome.notifiable() {
                if let Some(kind) = NotificationKind::from_transition(change.transition) {
                    pending.push(PendingNotification {
                        kind,
                        property: change.property.clone(),
                    });
                }
            }
        }
        self.trigger();
    }
}
