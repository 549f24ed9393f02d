//! Transactional upsert and history append implementing the property lifecycle.
//!
//! Every batch is applied inside one `BEGIN IMMEDIATE` transaction: either all
//! of its records (and their history rows) are committed or none are. Records
//! inside a batch are applied in order, so duplicates of one identity key in a
//! single batch behave like consecutive sightings.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_queue::Batch;
use listing_core::error::ValidationErrorCode;
use listing_core::{
    next_state, Error, ListingRecord, PropertyRecord, PropertyStatus, Result, Transition,
};
use sqlx::SqliteConnection;
use telemetry::metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{db_error, ImmediateTransaction, Store};
use crate::rows::{PropertyRow, PROPERTY_COLUMNS};

/// What one record did to its property.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub property: PropertyRecord,
    pub transition: Transition,
}

/// Committed result of one batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub changes: Vec<UpsertOutcome>,
}

impl BatchOutcome {
    pub fn count(&self, transition: Transition) -> usize {
        self.changes
            .iter()
            .filter(|c| c.transition == transition)
            .count()
    }

    /// Inserted and republished properties, in batch order.
    pub fn notifiable(&self) -> impl Iterator<Item = &UpsertOutcome> {
        self.changes.iter().filter(|c| c.transition.is_notifiable())
    }
}

/// Persistence of listing sightings.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Applies every record of the batch atomically.
    async fn apply_batch(&self, batch: &Batch) -> Result<BatchOutcome>;

    /// Marks listed properties of `city` whose key is not in `seen_keys` as
    /// inactive. Returns the keys that changed.
    async fn mark_missing(&self, city: &str, seen_keys: &HashSet<String>) -> Result<Vec<String>>;
}

/// `LifecycleStore` backed by the SQLite store.
#[derive(Clone)]
pub struct SqliteLifecycleStore {
    store: Store,
}

impl SqliteLifecycleStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[async_trait]
impl LifecycleStore for SqliteLifecycleStore {
    async fn apply_batch(&self, batch: &Batch) -> Result<BatchOutcome> {
        let mut tx = self.store.begin_immediate().await?;
        let now = Utc::now();

        let changes = match apply_records(&mut tx, &batch.records, now).await {
            Ok(changes) => changes,
            Err(e) => {
                rollback(tx, "apply_batch").await;
                return Err(e);
            }
        };
        tx.commit().await?;

        let outcome = BatchOutcome {
            batch_id: batch.id,
            changes,
        };
        record_transitions(&outcome);

        debug!(
            batch_id = %batch.id,
            records = batch.len(),
            created = outcome.count(Transition::Created),
            republished = outcome.count(Transition::Republished),
            "Batch committed"
        );
        Ok(outcome)
    }

    async fn mark_missing(&self, city: &str, seen_keys: &HashSet<String>) -> Result<Vec<String>> {
        let city = city.trim();
        if city.is_empty() {
            return Err(Error::validation_code(
                ValidationErrorCode::InvalidField,
                "mark_missing requires a city",
            ));
        }

        let mut tx = self.store.begin_immediate().await?;
        let missing = match mark_missing_tx(&mut tx, city, seen_keys, Utc::now()).await {
            Ok(missing) => missing,
            Err(e) => {
                rollback(tx, "mark_missing").await;
                return Err(e);
            }
        };
        tx.commit().await?;

        metrics()
            .lifecycle
            .marked_inactive
            .inc_by(missing.len() as u64);
        info!(
            city = %city,
            seen = seen_keys.len(),
            inactive = missing.len(),
            "Marked missing listings inactive"
        );
        Ok(missing)
    }
}

async fn rollback(tx: ImmediateTransaction, op: &'static str) {
    if let Err(e) = tx.rollback().await {
        warn!(op, error = %e, "Rollback failed");
    }
}

fn record_transitions(outcome: &BatchOutcome) {
    let m = metrics();
    for change in &outcome.changes {
        match change.transition {
            Transition::Created => m.lifecycle.inserted.inc(),
            Transition::Updated => m.lifecycle.updated.inc(),
            Transition::Sold => m.lifecycle.sold.inc(),
            Transition::Republished => m.lifecycle.republished.inc(),
        }
    }
}

async fn apply_records(
    conn: &mut SqliteConnection,
    records: &[ListingRecord],
    now: DateTime<Utc>,
) -> Result<Vec<UpsertOutcome>> {
    let mut changes = Vec::with_capacity(records.len());

    for record in records {
        let existing = fetch_by_key(conn, &record.identity_key).await?;
        let (mut property, transition) = next_property(existing.as_ref(), record, now);

        property.id = match existing {
            Some(_) => {
                update_property(conn, &property).await?;
                property.id
            }
            None => insert_property(conn, &property).await?,
        };
        append_history(conn, &property, now).await?;

        changes.push(UpsertOutcome {
            property,
            transition,
        });
    }

    Ok(changes)
}

/// Folds one sighting into the current state.
///
/// Optional attributes missing from the record keep their stored value.
pub(crate) fn next_property(
    existing: Option<&PropertyRecord>,
    record: &ListingRecord,
    now: DateTime<Utc>,
) -> (PropertyRecord, Transition) {
    let step = next_state(existing.map(|p| p.status), record.status);

    let street = or_stored(&record.street, existing.map(|p| &p.street));
    let postal_code = or_stored(&record.postal_code, existing.map(|p| &p.postal_code));
    let city = or_stored(&record.city, existing.map(|p| &p.city));

    let selling_date = if step.status == PropertyStatus::Sold {
        record
            .selling_date
            .or_else(|| existing.and_then(|p| p.selling_date))
            .or_else(|| Some(record.observed_at.date_naive()))
    } else {
        record.selling_date
    };

    let (latitude, longitude, enrichment_attempted) = match existing {
        Some(p) if p.street == street && p.postal_code == postal_code && p.city == city => {
            (p.latitude, p.longitude, p.enrichment_attempted)
        }
        _ => (None, None, false),
    };

    let property = PropertyRecord {
        id: existing.map_or(0, |p| p.id),
        identity_key: record.identity_key.clone(),
        street,
        postal_code,
        city,
        neighborhood: or_stored(&record.neighborhood, existing.map(|p| &p.neighborhood)),
        property_type: or_stored(&record.property_type, existing.map(|p| &p.property_type)),
        price: record.price.or_else(|| existing.and_then(|p| p.price)),
        year_built: record.year_built.or_else(|| existing.and_then(|p| p.year_built)),
        living_area: record
            .living_area
            .or_else(|| existing.and_then(|p| p.living_area)),
        num_rooms: record.num_rooms.or_else(|| existing.and_then(|p| p.num_rooms)),
        status: step.status,
        listing_date: record
            .listing_date
            .or_else(|| existing.and_then(|p| p.listing_date)),
        selling_date,
        observed_at: record.observed_at,
        energy_label: or_stored(&record.energy_label, existing.map(|p| &p.energy_label)),
        republish_count: existing.map_or(0, |p| p.republish_count) + step.republish_increment,
        latitude,
        longitude,
        enrichment_attempted,
        created_at: existing.map_or(now, |p| p.created_at),
        updated_at: now,
    };

    (property, step.transition)
}

fn or_stored(new: &Option<String>, stored: Option<&Option<String>>) -> Option<String> {
    new.clone().or_else(|| stored.and_then(|s| s.clone()))
}

async fn fetch_by_key(conn: &mut SqliteConnection, key: &str) -> Result<Option<PropertyRecord>> {
    let sql = format!(
        "SELECT {} FROM properties WHERE identity_key = ?",
        PROPERTY_COLUMNS
    );
    let row: Option<PropertyRow> = sqlx::query_as(&sql)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    row.map(PropertyRecord::try_from).transpose()
}

async fn insert_property(conn: &mut SqliteConnection, p: &PropertyRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO properties (
            identity_key, street, postal_code, city, neighborhood, property_type,
            price, year_built, living_area, num_rooms, energy_label,
            status, listing_date, selling_date, observed_at, republish_count,
            latitude, longitude, enrichment_attempted, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&p.identity_key)
    .bind(&p.street)
    .bind(&p.postal_code)
    .bind(&p.city)
    .bind(&p.neighborhood)
    .bind(&p.property_type)
    .bind(p.price)
    .bind(p.year_built)
    .bind(p.living_area)
    .bind(p.num_rooms)
    .bind(&p.energy_label)
    .bind(p.status.as_str())
    .bind(p.listing_date)
    .bind(p.selling_date)
    .bind(p.observed_at)
    .bind(p.republish_count)
    .bind(p.latitude)
    .bind(p.longitude)
    .bind(p.enrichment_attempted)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(result.last_insert_rowid())
}

async fn update_property(conn: &mut SqliteConnection, p: &PropertyRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE properties SET
            street = ?, postal_code = ?, city = ?, neighborhood = ?, property_type = ?,
            price = ?, year_built = ?, living_area = ?, num_rooms = ?, energy_label = ?,
            status = ?, listing_date = ?, selling_date = ?, observed_at = ?,
            republish_count = ?, latitude = ?, longitude = ?, enrichment_attempted = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&p.street)
    .bind(&p.postal_code)
    .bind(&p.city)
    .bind(&p.neighborhood)
    .bind(&p.property_type)
    .bind(p.price)
    .bind(p.year_built)
    .bind(p.living_area)
    .bind(p.num_rooms)
    .bind(&p.energy_label)
    .bind(p.status.as_str())
    .bind(p.listing_date)
    .bind(p.selling_date)
    .bind(p.observed_at)
    .bind(p.republish_count)
    .bind(p.latitude)
    .bind(p.longitude)
    .bind(p.enrichment_attempted)
    .bind(p.updated_at)
    .bind(p.id)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

async fn append_history(
    conn: &mut SqliteConnection,
    p: &PropertyRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO property_history (property_id, status, price, listing_date, observed_at, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(p.id)
    .bind(p.status.as_str())
    .bind(p.price)
    .bind(p.listing_date)
    .bind(p.observed_at)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

async fn mark_missing_tx(
    conn: &mut SqliteConnection,
    city: &str,
    seen_keys: &HashSet<String>,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let listed: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT id, identity_key FROM properties
        WHERE city = ? COLLATE NOCASE AND status IN ('active', 'republished')
        ORDER BY id
        "#,
    )
    .bind(city)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    let mut missing = Vec::new();
    for (id, key) in listed {
        if seen_keys.contains(&key) {
            continue;
        }
        sqlx::query("UPDATE properties SET status = 'inactive', updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(db_error)?;
        missing.push(key);
    }

    Ok(missing)
}
