//! Core types, validation, and the property lifecycle for the listing pipeline.

pub mod error;
pub mod geo;
pub mod limits;
pub mod listing;
pub mod notification;
pub mod property;

pub use error::{Error, Result};
pub use geo::*;
pub use listing::*;
pub use notification::*;
pub use property::*;
