//! Write-through geocode cache in front of the rate-limited client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use listing_core::{AddressQuery, Coordinates, Result};
use listing_store::{
    delete_negative_geocodes, load_geocode_cache, save_geocode, CachedGeocode, Store,
};
use parking_lot::RwLock;
use telemetry::metrics;
use tracing::{info, warn};

use crate::geocoder::GeocodeClient;
use crate::rate_limit::RateLimiter;

/// Failure reason recorded when the service has no result.
pub const NOT_FOUND: &str = "not_found";

/// Address lookups, answered from memory when possible.
///
/// Every external result, positive or negative, is persisted before it is
/// returned, so a restart never repeats a lookup.
pub struct GeocodeCache {
    index: RwLock<HashMap<String, Option<Coordinates>>>,
    client: Arc<dyn GeocodeClient>,
    limiter: RateLimiter,
    store: Store,
}

impl GeocodeCache {
    /// Builds the cache and warms it from the store.
    pub async fn load(
        client: Arc<dyn GeocodeClient>,
        store: Store,
        min_interval: Duration,
    ) -> Result<Self> {
        let entries = load_geocode_cache(&store).await?;
        let index: HashMap<_, _> = entries
            .into_iter()
            .map(|e| (e.key, e.coordinates))
            .collect();

        info!(
            entries = index.len(),
            negative = index.values().filter(|c| c.is_none()).count(),
            "Geocode cache loaded"
        );

        Ok(Self {
            index: RwLock::new(index),
            client,
            limiter: RateLimiter::new(min_interval),
            store,
        })
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: &str) -> Option<Option<Coordinates>> {
        self.index.read().get(key).copied()
    }

    /// Coordinates for `address`, or `None` if it cannot be resolved.
    ///
    /// A cached failure is returned as `None` without calling the service.
    pub async fn lookup(&self, address: &AddressQuery) -> Result<Option<Coordinates>> {
        let key = address.cache_key();
        let m = metrics();

        if let Some(hit) = self.cached(&key) {
            m.enrichment.cache_hits.inc();
            return Ok(hit);
        }
        m.enrichment.cache_misses.inc();

        self.limiter.acquire().await;
        // Filled by another caller while we waited for a permit.
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let entry = match self.client.geocode(address).await {
            Ok(Some(coordinates)) => CachedGeocode::found(&key, coordinates),
            Ok(None) => CachedGeocode::failed(&key, NOT_FOUND),
            Err(e) => {
                m.enrichment.lookups_failed.inc();
                warn!(address = %key, error = %e, "Geocoding failed, caching as negative");
                CachedGeocode::failed(&key, e.to_string())
            }
        };

        self.index.write().insert(key, entry.coordinates);
        save_geocode(&self.store, &entry).await?;
        Ok(entry.coordinates)
    }

    /// Forgets cached failures so the addresses are looked up again.
    pub async fn forget_failures(&self, keys: &[String]) -> Result<()> {
        {
            let mut index = self.index.write();
            for key in keys {
                if matches!(index.get(key), Some(None)) {
                    index.remove(key);
                }
            }
        }
        delete_negative_geocodes(&self.store, keys).await?;
        Ok(())
    }
}
