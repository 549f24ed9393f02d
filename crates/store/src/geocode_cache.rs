//! Persisted geocoding results.

use chrono::{DateTime, Utc};
use listing_core::{Coordinates, Result};
use serde::{Deserialize, Serialize};

use crate::client::{db_error, Store};

/// One cached lookup. `coordinates == None` is a remembered failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedGeocode {
    pub key: String,
    pub coordinates: Option<Coordinates>,
    /// Why the lookup failed (`not_found`, `out_of_bounds`, transport error text).
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CachedGeocode {
    pub fn found(key: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            key: key.into(),
            coordinates: Some(coordinates),
            reason: None,
            updated_at: Utc::now(),
        }
    }

    pub fn failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            coordinates: None,
            reason: Some(reason.into()),
            updated_at: Utc::now(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct GeocodeRow {
    cache_key: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    found: bool,
    reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<GeocodeRow> for CachedGeocode {
    fn from(row: GeocodeRow) -> Self {
        let coordinates = match (row.found, row.latitude, row.longitude) {
            (true, Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        };
        Self {
            key: row.cache_key,
            coordinates,
            reason: row.reason,
            updated_at: row.updated_at,
        }
    }
}

/// Every cached lookup, for warming the in-memory index at startup.
pub async fn load_geocode_cache(store: &Store) -> Result<Vec<CachedGeocode>> {
    let rows: Vec<GeocodeRow> = sqlx::query_as(
        "SELECT cache_key, latitude, longitude, found, reason, updated_at FROM geocode_cache",
    )
    .fetch_all(store.pool())
    .await
    .map_err(db_error)?;

    Ok(rows.into_iter().map(CachedGeocode::from).collect())
}

/// Inserts or replaces a cached lookup.
pub async fn save_geocode(store: &Store, entry: &CachedGeocode) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO geocode_cache (cache_key, latitude, longitude, found, reason, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (cache_key) DO UPDATE SET
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            found = excluded.found,
            reason = excluded.reason,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.key)
    .bind(entry.coordinates.map(|c| c.lat))
    .bind(entry.coordinates.map(|c| c.lon))
    .bind(entry.coordinates.is_some())
    .bind(&entry.reason)
    .bind(entry.updated_at)
    .execute(store.pool())
    .await
    .map_err(db_error)?;

    Ok(())
}

/// Forgets remembered failures for the given keys. Positive entries stay.
pub async fn delete_negative_geocodes(store: &Store, keys: &[String]) -> Result<u64> {
    let mut deleted = 0;
    for key in keys {
        deleted += sqlx::query("DELETE FROM geocode_cache WHERE cache_key = ? AND found = 0")
            .bind(key)
            .execute(store.pool())
            .await
            .map_err(db_error)?
            .rows_affected();
    }
    Ok(deleted)
}
