//! In-memory ingestion queue for listing batches.

pub mod batch;
pub mod config;
pub mod handler;
pub mod queue;

pub use batch::*;
pub use config::*;
pub use handler::*;
pub use queue::*;
