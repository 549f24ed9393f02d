//! Persisted property state and the lifecycle state machine.
//!
//! | current      | incoming | next        | republish_count |
//! |--------------|----------|-------------|-----------------|
//! | none         | active   | active      | 0               |
//! | none         | sold     | sold        | 0               |
//! | active       | active   | active      | unchanged       |
//! | active       | sold     | sold        | unchanged       |
//! | inactive     | active   | republished | +1              |
//! | inactive     | sold     | sold        | unchanged       |
//! | sold         | active   | republished | +1              |
//! | sold         | sold     | sold        | unchanged       |
//! | republished  | active   | republished | unchanged       |
//! | republished  | sold     | sold        | unchanged       |
//!
//! `inactive` is only ever entered through mark-missing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geo::Coordinates;
use crate::listing::{district_code, ListingStatus};

/// Lifecycle state of a persisted property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyStatus {
    Active,
    Inactive,
    Sold,
    Republished,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Sold => "sold",
            Self::Republished => "republished",
        }
    }

    /// Whether the property is currently on the market and can go missing.
    pub fn is_listed(&self) -> bool {
        matches!(self, Self::Active | Self::Republished)
    }

    pub fn all() -> [Self; 4] {
        [Self::Active, Self::Inactive, Self::Sold, Self::Republished]
    }
}

impl FromStr for PropertyStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "sold" => Ok(Self::Sold),
            "republished" => Ok(Self::Republished),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a sighting did to a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// First sighting of the identity key.
    Created,
    /// Same lifecycle state, mutable fields refreshed.
    Updated,
    /// Entered `sold`.
    Sold,
    /// Re-entered the market after being inactive or sold.
    Republished,
}

impl Transition {
    /// Sightings the notification collaborator is told about.
    pub fn is_notifiable(&self) -> bool {
        matches!(self, Self::Created | Self::Republished)
    }
}

/// Outcome of applying one sighting to the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleStep {
    pub transition: Transition,
    pub status: PropertyStatus,
    pub republish_increment: i64,
}

/// Applies an incoming sighting to the current lifecycle state.
pub fn next_state(current: Option<PropertyStatus>, incoming: ListingStatus) -> LifecycleStep {
    use ListingStatus as In;
    use PropertyStatus as S;

    let (transition, status, republish_increment) = match (current, incoming) {
        (None, In::Active) => (Transition::Created, S::Active, 0),
        (None, In::Sold) => (Transition::Created, S::Sold, 0),
        (Some(S::Active), In::Active) => (Transition::Updated, S::Active, 0),
        (Some(S::Republished), In::Active) => (Transition::Updated, S::Republished, 0),
        (Some(S::Inactive | S::Sold), In::Active) => (Transition::Republished, S::Republished, 1),
        (Some(S::Sold), In::Sold) => (Transition::Updated, S::Sold, 0),
        (Some(S::Active | S::Inactive | S::Republished), In::Sold) => (Transition::Sold, S::Sold, 0),
    };

    LifecycleStep {
        transition,
        status,
        republish_increment,
    }
}

/// Current state of one physical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: i64,
    pub identity_key: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub property_type: Option<String>,
    pub price: Option<i64>,
    pub year_built: Option<i32>,
    pub living_area: Option<i32>,
    pub num_rooms: Option<i32>,
    pub status: PropertyStatus,
    pub listing_date: Option<NaiveDate>,
    pub selling_date: Option<NaiveDate>,
    pub observed_at: DateTime<Utc>,
    pub energy_label: Option<String>,
    pub republish_count: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub enrichment_attempted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PropertyRecord {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        }
    }

    /// Asking price per square meter, when both inputs are known.
    pub fn price_per_sqm(&self) -> Option<f64> {
        match (self.price, self.living_area) {
            (Some(price), Some(area)) if area > 0 => Some(price as f64 / area as f64),
            _ => None,
        }
    }

    pub fn district_code(&self) -> Option<String> {
        self.postal_code.as_deref().and_then(district_code)
    }
}

/// Immutable audit row, one per ingested sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub property_id: i64,
    pub status: PropertyStatus,
    pub price: Option<i64>,
    pub listing_date: Option<NaiveDate>,
    pub observed_at: DateTime<Utc>,
}
