//! SQLite table schemas.
//!
//! Dates are stored as ISO-8601 text. `property_history` is append-only and
//! enforced by triggers.

/// Current state, one row per identity key.
pub const CREATE_PROPERTIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key TEXT NOT NULL UNIQUE,

    -- Address
    street TEXT,
    postal_code TEXT,
    city TEXT,
    neighborhood TEXT,

    -- Attributes
    property_type TEXT,
    price INTEGER,
    year_built INTEGER,
    living_area INTEGER CHECK (living_area IS NULL OR living_area > 0),
    num_rooms INTEGER,
    energy_label TEXT,

    -- Lifecycle
    status TEXT NOT NULL CHECK (status IN ('active', 'inactive', 'sold', 'republished')),
    listing_date TEXT,
    selling_date TEXT,
    observed_at TEXT NOT NULL,
    republish_count INTEGER NOT NULL DEFAULT 0,

    -- Enrichment
    latitude REAL,
    longitude REAL,
    enrichment_attempted INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_PROPERTIES_CITY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_properties_city_status
ON properties (city COLLATE NOCASE, status)
"#;

pub const CREATE_PROPERTIES_ENRICHMENT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_properties_awaiting_enrichment
ON properties (id)
WHERE latitude IS NULL AND enrichment_attempted = 0
"#;

/// One row per ingested sighting.
pub const CREATE_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS property_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    property_id INTEGER NOT NULL REFERENCES properties (id),
    status TEXT NOT NULL,
    price INTEGER,
    listing_date TEXT,
    observed_at TEXT NOT NULL,
    recorded_at TEXT NOT NULL
)
"#;

pub const CREATE_HISTORY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_property_history_property
ON property_history (property_id, id)
"#;

pub const CREATE_HISTORY_NO_UPDATE: &str = r#"
CREATE TRIGGER IF NOT EXISTS property_history_no_update
BEFORE UPDATE ON property_history
BEGIN
    SELECT RAISE(ABORT, 'property_history is append-only');
END
"#;

pub const CREATE_HISTORY_NO_DELETE: &str = r#"
CREATE TRIGGER IF NOT EXISTS property_history_no_delete
BEFORE DELETE ON property_history
BEGIN
    SELECT RAISE(ABORT, 'property_history is append-only');
END
"#;

/// Geocoding results keyed by normalized address. A row with `found = 0` is
/// a cached failure.
pub const CREATE_GEOCODE_CACHE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS geocode_cache (
    cache_key TEXT PRIMARY KEY,
    latitude REAL,
    longitude REAL,
    found INTEGER NOT NULL,
    reason TEXT,
    updated_at TEXT NOT NULL
)
"#;

/// All DDL statements in dependency order.
pub fn all_tables() -> Vec<&'static str> {
    vec![
        CREATE_PROPERTIES_TABLE,
        CREATE_PROPERTIES_CITY_INDEX,
        CREATE_PROPERTIES_ENRICHMENT_INDEX,
        CREATE_HISTORY_TABLE,
        CREATE_HISTORY_INDEX,
        CREATE_HISTORY_NO_UPDATE,
        CREATE_HISTORY_NO_DELETE,
        CREATE_GEOCODE_CACHE_TABLE,
    ]
}
