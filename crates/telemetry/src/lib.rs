//! Internal telemetry for the listing pipeline.
//!
//! Metrics live in-process and are logged as snapshots; there is no external
//! metrics backend.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
