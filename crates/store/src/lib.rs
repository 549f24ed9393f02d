//! Durable storage for the listing pipeline.

pub mod client;
pub mod config;
pub mod geocode_cache;
pub mod health;
pub mod lifecycle;
pub mod query;
mod rows;
pub mod schema;

pub use client::*;
pub use config::*;
pub use geocode_cache::*;
pub use lifecycle::*;
pub use query::*;
