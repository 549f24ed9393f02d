//! Read queries and enrichment updates.

use std::collections::HashMap;

use chrono::Utc;
use listing_core::{Coordinates, HistoryEntry, PropertyRecord, PropertyStatus, Result};
use tracing::warn;

use crate::client::{db_error, Store};
use crate::rows::{into_records, HistoryRow, PropertyRow, PROPERTY_COLUMNS};

/// Fetch the current state of a property.
pub async fn get_property(store: &Store, identity_key: &str) -> Result<Option<PropertyRecord>> {
    let sql = format!(
        "SELECT {} FROM properties WHERE identity_key = ?",
        PROPERTY_COLUMNS
    );
    let row: Option<PropertyRow> = sqlx::query_as(&sql)
        .bind(identity_key)
        .fetch_optional(store.pool())
        .await
        .map_err(db_error)?;
    row.map(PropertyRecord::try_from).transpose()
}

/// Fetch properties by key, skipping unknown keys.
pub async fn get_properties(store: &Store, identity_keys: &[String]) -> Result<Vec<PropertyRecord>> {
    let mut properties = Vec::with_capacity(identity_keys.len());
    for key in identity_keys {
        if let Some(p) = get_property(store, key).await? {
            properties.push(p);
        }
    }
    Ok(properties)
}

/// History of a property in commit order.
pub async fn history_for(store: &Store, identity_key: &str) -> Result<Vec<HistoryEntry>> {
    let rows: Vec<HistoryRow> = sqlx::query_as(
        r#"
        SELECT h.id, h.property_id, h.status, h.price, h.listing_date, h.observed_at
        FROM property_history h
        JOIN properties p ON p.id = h.property_id
        WHERE p.identity_key = ?
        ORDER BY h.id
        "#,
    )
    .bind(identity_key)
    .fetch_all(store.pool())
    .await
    .map_err(db_error)?;

    rows.into_iter().map(HistoryEntry::try_from).collect()
}

/// Property count per lifecycle status. Every status is present.
pub async fn count_by_status(store: &Store) -> Result<HashMap<PropertyStatus, i64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM properties GROUP BY status")
            .fetch_all(store.pool())
            .await
            .map_err(db_error)?;

    let mut counts: HashMap<_, _> = PropertyStatus::all().into_iter().map(|s| (s, 0)).collect();
    for (status, count) in rows {
        match status.parse() {
            Ok(status) => {
                counts.insert(status, count);
            }
            Err(_) => warn!(status = %status, "Skipping unknown status in counts"),
        }
    }
    Ok(counts)
}

/// Keys of the active and republished properties of a city.
pub async fn listed_keys_for_city(store: &Store, city: &str) -> Result<Vec<String>> {
    sqlx::query_scalar(
        r#"
        SELECT identity_key FROM properties
        WHERE city = ? COLLATE NOCASE AND status IN ('active', 'republished')
        ORDER BY id
        "#,
    )
    .bind(city.trim())
    .fetch_all(store.pool())
    .await
    .map_err(db_error)
}

/// Properties without coordinates that were never sent to enrichment.
pub async fn awaiting_enrichment(store: &Store, limit: u32) -> Result<Vec<PropertyRecord>> {
    let sql = format!(
        "SELECT {} FROM properties \
         WHERE latitude IS NULL AND enrichment_attempted = 0 \
         ORDER BY id LIMIT ?",
        PROPERTY_COLUMNS
    );
    let rows: Vec<PropertyRow> = sqlx::query_as(&sql)
        .bind(limit)
        .fetch_all(store.pool())
        .await
        .map_err(db_error)?;
    into_records(rows)
}

/// Result of enriching one property.
#[derive(Debug, Clone)]
pub struct EnrichmentUpdate {
    pub property_id: i64,
    /// Address the lookup was made for.
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    /// `None` marks the property attempted without coordinates.
    pub coordinates: Option<Coordinates>,
}

impl EnrichmentUpdate {
    pub fn for_property(property: &PropertyRecord, coordinates: Option<Coordinates>) -> Self {
        Self {
            property_id: property.id,
            street: property.street.clone(),
            postal_code: property.postal_code.clone(),
            city: property.city.clone(),
            coordinates,
        }
    }
}

/// Applies a sub-batch of enrichment results in one transaction.
///
/// A property whose address changed since it was read is left alone so that a
/// stale lookup never lands on a new address. Returns the number updated.
pub async fn apply_enrichment(store: &Store, updates: &[EnrichmentUpdate]) -> Result<u64> {
    if updates.is_empty() {
        return Ok(0);
    }

    let now = Utc::now();
    let mut tx = store.begin_immediate().await?;
    let mut applied = 0;

    for update in updates {
        let result = sqlx::query(
            r#"
            UPDATE properties
            SET latitude = ?, longitude = ?, enrichment_attempted = 1, updated_at = ?
            WHERE id = ? AND enrichment_attempted = 0
              AND street IS ? AND postal_code IS ? AND city IS ?
            "#,
        )
        .bind(update.coordinates.map(|c| c.lat))
        .bind(update.coordinates.map(|c| c.lon))
        .bind(now)
        .bind(update.property_id)
        .bind(&update.street)
        .bind(&update.postal_code)
        .bind(&update.city)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(r) => applied += r.rows_affected(),
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback failed");
                }
                return Err(db_error(e));
            }
        }
    }

    tx.commit().await?;
    Ok(applied)
}

/// Clears coordinates and the attempted flag so the next sweep retries.
///
/// Returns the properties that were reset, with their addresses.
pub async fn reset_enrichment(store: &Store, identity_keys: &[String]) -> Result<Vec<PropertyRecord>> {
    let now = Utc::now();
    let mut tx = store.begin_immediate().await?;

    for key in identity_keys {
        let result = sqlx::query(
            r#"
            UPDATE properties
            SET latitude = NULL, longitude = NULL, enrichment_attempted = 0, updated_at = ?
            WHERE identity_key = ?
            "#,
        )
        .bind(now)
        .bind(key)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "Rollback failed");
            }
            return Err(db_error(e));
        }
    }

    tx.commit().await?;
    get_properties(store, identity_keys).await
}
