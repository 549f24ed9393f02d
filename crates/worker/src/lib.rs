//! Background workers for the listing pipeline.
//!
//! - Batch processor (queue → lifecycle store, with retries)
//! - Enrichment sweeper (rate-limited, cache-backed geocoding)
//! - Notifications (inserted and republished properties)
//! - Pipeline coordinator (startup wiring and ordered shutdown)

pub mod cache;
pub mod coordinator;
pub mod enrichment;
pub mod geocoder;
pub mod notifications;
pub mod processor;
pub mod rate_limit;

pub use cache::GeocodeCache;
pub use coordinator::*;
pub use enrichment::{EnrichmentConfig, EnrichmentSweeper, SweepStats};
pub use geocoder::{GeocodeClient, GeocoderConfig, NominatimClient};
pub use notifications::*;
pub use processor::*;
