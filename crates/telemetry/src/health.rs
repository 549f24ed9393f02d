//! Health of the pipeline's external collaborators.
//!
//! The store is required for ingestion; a geocoder outage only degrades
//! enrichment, so it never makes the pipeline unhealthy on its own.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Default)]
struct Probe {
    /// `None` until the first check
    last_ok: Option<bool>,
    checked_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

/// Result of the most recent check of one collaborator.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    probe: Mutex<Probe>,
}

impl ComponentHealth {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            probe: Mutex::new(Probe::default()),
        }
    }

    pub fn set_healthy(&self) {
        let mut probe = self.probe.lock();
        probe.last_ok = Some(true);
        probe.checked_at = Some(Utc::now());
        probe.consecutive_failures = 0;
        probe.last_error = None;
    }

    pub fn set_unhealthy(&self, error: impl Into<String>) {
        let mut probe = self.probe.lock();
        probe.last_ok = Some(false);
        probe.checked_at = Some(Utc::now());
        probe.consecutive_failures = probe.consecutive_failures.saturating_add(1);
        probe.last_error = Some(error.into());
    }

    /// Unchecked counts as unhealthy.
    pub fn is_healthy(&self) -> bool {
        self.probe.lock().last_ok == Some(true)
    }

    pub fn report(&self) -> ComponentReport {
        let probe = self.probe.lock();
        ComponentReport {
            name: self.name,
            healthy: probe.last_ok == Some(true),
            checked_at: probe.checked_at,
            consecutive_failures: probe.consecutive_failures,
            last_error: probe.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub name: &'static str,
    pub healthy: bool,
    pub checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store: ComponentReport,
    pub geocoder: ComponentReport,
}

#[derive(Debug)]
pub struct HealthRegistry {
    pub store: ComponentHealth,
    pub geocoder: ComponentHealth,
}

impl HealthRegistry {
    fn new() -> Self {
        Self {
            store: ComponentHealth::new("store"),
            geocoder: ComponentHealth::new("geocoder"),
        }
    }

    pub fn report(&self) -> HealthReport {
        let store = self.store.report();
        let geocoder = self.geocoder.report();
        let status = if !store.healthy {
            HealthStatus::Unhealthy
        } else if geocoder.healthy || geocoder.checked_at.is_none() {
            // An idle geocoder has nothing to report against.
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            store,
            geocoder,
        }
    }

    /// Whether batches can be persisted.
    pub fn is_ready(&self) -> bool {
        self.store.is_healthy()
    }
}

static HEALTH: std::sync::LazyLock<HealthRegistry> = std::sync::LazyLock::new(HealthRegistry::new);

/// Process-wide health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geocoder_outage_only_degrades() {
        let registry = HealthRegistry::new();
        registry.store.set_healthy();
        registry.geocoder.set_unhealthy("timeout");
        registry.geocoder.set_unhealthy("timeout");

        let report = registry.report();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(registry.is_ready());
        assert_eq!(report.geocoder.consecutive_failures, 2);
        assert_eq!(report.geocoder.last_error.as_deref(), Some("timeout"));

        registry.geocoder.set_healthy();
        let report = registry.report();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.geocoder.consecutive_failures, 0);
    }

    #[test]
    fn test_unused_geocoder_is_not_degraded() {
        let registry = HealthRegistry::new();
        registry.store.set_healthy();
        assert_eq!(registry.report().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_store_outage_is_unhealthy() {
        let registry = HealthRegistry::new();
        assert!(!registry.is_ready());
        registry.geocoder.set_healthy();
        registry.store.set_unhealthy("database is locked");
        assert_eq!(registry.report().status, HealthStatus::Unhealthy);
    }
}
