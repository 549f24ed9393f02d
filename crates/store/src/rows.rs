use chrono::{DateTime, NaiveDate, Utc};
use listing_core::error::DbErrorCode;
use listing_core::{Error, HistoryEntry, PropertyRecord, PropertyStatus, Result};

/// Column list matching `PropertyRow`.
pub(crate) const PROPERTY_COLUMNS: &str = "id, identity_key, street, postal_code, city, \
    neighborhood, property_type, price, year_built, living_area, num_rooms, status, \
    listing_date, selling_date, observed_at, energy_label, republish_count, latitude, \
    longitude, enrichment_attempted, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PropertyRow {
    id: i64,
    identity_key: String,
    street: Option<String>,
    postal_code: Option<String>,
    city: Option<String>,
    neighborhood: Option<String>,
    property_type: Option<String>,
    price: Option<i64>,
    year_built: Option<i32>,
    living_area: Option<i32>,
    num_rooms: Option<i32>,
    status: String,
    listing_date: Option<NaiveDate>,
    selling_date: Option<NaiveDate>,
    observed_at: DateTime<Utc>,
    energy_label: Option<String>,
    republish_count: i64,
    latitude: Option<f64>,
    longitude: Option<f64>,
    enrichment_attempted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PropertyRow> for PropertyRecord {
    type Error = Error;

    fn try_from(row: PropertyRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            status: parse_status(&row.status)?,
            identity_key: row.identity_key,
            street: row.street,
            postal_code: row.postal_code,
            city: row.city,
            neighborhood: row.neighborhood,
            property_type: row.property_type,
            price: row.price,
            year_built: row.year_built,
            living_area: row.living_area,
            num_rooms: row.num_rooms,
            listing_date: row.listing_date,
            selling_date: row.selling_date,
            observed_at: row.observed_at,
            energy_label: row.energy_label,
            republish_count: row.republish_count,
            latitude: row.latitude,
            longitude: row.longitude,
            enrichment_attempted: row.enrichment_attempted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HistoryRow {
    id: i64,
    property_id: i64,
    status: String,
    price: Option<i64>,
    listing_date: Option<NaiveDate>,
    observed_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            property_id: row.property_id,
            status: parse_status(&row.status)?,
            price: row.price,
            listing_date: row.listing_date,
            observed_at: row.observed_at,
        })
    }
}

fn parse_status(raw: &str) -> Result<PropertyStatus> {
    raw.parse().map_err(|_| {
        Error::database(
            DbErrorCode::StoreFailed,
            format!("unknown status '{}' in store", raw),
        )
    })
}

pub(crate) fn into_records(rows: Vec<PropertyRow>) -> Result<Vec<PropertyRecord>> {
    rows.into_iter().map(PropertyRecord::try_from).collect()
}
