//! Size limits and pipeline defaults.
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so `MAX_IDENTITY_KEY_LEN` is duplicated there. Keep both in sync when modifying.

// === Input ===

/// Schema version of `RawListing` understood by this build.
pub const CURRENT_SCHEMA_VERSION: u16 = 1;

/// Identity keys are listing URLs; matches the common URL length ceiling.
pub const MAX_IDENTITY_KEY_LEN: usize = 2048;

// Attributes outside these bounds are stored as unknown rather than rejected.

pub const MAX_STREET_LEN: usize = 256;
pub const MAX_POSTAL_CODE_LEN: usize = 16;
/// Also used for neighborhood and property type.
pub const MAX_CITY_LEN: usize = 128;
pub const MAX_ENERGY_LABEL_LEN: usize = 8;

pub const MIN_YEAR_BUILT: i32 = 1000;
pub const MAX_YEAR_BUILT: i32 = 2200;
pub const MAX_NUM_ROOMS: i32 = 1000;

// === Batches ===

/// Maximum records accepted in a single batch.
pub const DEFAULT_MAX_BATCH_RECORDS: usize = 1000;

/// Batches the ingestion queue buffers before producers see backpressure.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

// === Enrichment ===

/// Properties geocoded per enrichment transaction.
pub const DEFAULT_ENRICHMENT_BATCH_SIZE: usize = 10;

/// Minimum spacing between outbound geocoding calls (Nominatim usage policy).
pub const DEFAULT_GEOCODE_MIN_INTERVAL_MS: u64 = 1000;
