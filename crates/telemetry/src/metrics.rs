//! In-process pipeline metrics.
//!
//! One counter group per pipeline stage. Counters are bumped with relaxed
//! atomics on the hot path; [`Metrics::snapshot`] reads them back as a
//! serializable value that the coordinator logs periodically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-written value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Running count, total and worst case of a duration in milliseconds.
#[derive(Debug, Default)]
pub struct Latency {
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl Latency {
    pub fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_ms.load(Ordering::Relaxed);
        LatencySnapshot {
            count,
            mean_ms: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            },
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: u64,
}

/// Declares a group of counters together with its snapshot type.
macro_rules! counter_group {
    ($(#[$meta:meta])* $group:ident => $snapshot:ident { $($field:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Default)]
        pub struct $group {
            $(pub $field: Counter,)+
        }

        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $snapshot {
            $(pub $field: u64,)+
        }

        impl $group {
            pub fn snapshot(&self) -> $snapshot {
                $snapshot {
                    $($field: self.$field.get(),)+
                }
            }
        }
    };
}

counter_group! {
    /// Ingestion queue admission and delivery.
    QueueMetrics => QueueSnapshot {
        batches_pushed,
        batches_backpressured,
        batches_dropped_on_close,
        records_accepted,
        records_rejected,
        handler_failures,
    }
}

counter_group! {
    /// Batch processor outcomes, one count per batch.
    ProcessorMetrics => ProcessorSnapshot {
        batches_committed,
        batch_retries,
        batches_failed,
    }
}

counter_group! {
    /// Committed lifecycle transitions, one count per property.
    LifecycleMetrics => LifecycleSnapshot {
        inserted,
        updated,
        sold,
        republished,
        marked_inactive,
    }
}

counter_group! {
    EnrichmentMetrics => EnrichmentSnapshot {
        cache_hits,
        cache_misses,
        lookups_failed,
        properties_enriched,
        sweeps,
    }
}

counter_group! {
    NotificationMetrics => NotificationSnapshot {
        sent,
        failed,
    }
}

/// All pipeline metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    pub queue: QueueMetrics,
    /// Batches waiting for the dispatcher.
    pub queue_depth: Gauge,
    pub processor: ProcessorMetrics,
    /// Time spent in successful `apply_batch` calls.
    pub commit_latency: Latency,
    pub lifecycle: LifecycleMetrics,
    pub enrichment: EnrichmentMetrics,
    pub notifications: NotificationMetrics,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub queue: QueueSnapshot,
    pub queue_depth: u64,
    pub processor: ProcessorSnapshot,
    pub commit_latency: LatencySnapshot,
    pub lifecycle: LifecycleSnapshot,
    pub enrichment: EnrichmentSnapshot,
    pub notifications: NotificationSnapshot,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            queue: self.queue.snapshot(),
            queue_depth: self.queue_depth.get(),
            processor: self.processor.snapshot(),
            commit_latency: self.commit_latency.snapshot(),
            lifecycle: self.lifecycle.snapshot(),
            enrichment: self.enrichment.snapshot(),
            notifications: self.notifications.snapshot(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::default);

pub fn metrics() -> &'static Metrics {
    &METRICS
}
