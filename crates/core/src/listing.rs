//! Listing input types.
//!
//! `RawListing` is the versioned wire shape produced by crawlers; every field is
//! optional so that a partially scraped page still deserializes. It is converted
//! exactly once, at the queue boundary, into a validated `ListingRecord`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result, ValidationErrorCode};
use crate::limits::{
    CURRENT_SCHEMA_VERSION, MAX_CITY_LEN, MAX_ENERGY_LABEL_LEN, MAX_IDENTITY_KEY_LEN,
    MAX_NUM_ROOMS, MAX_POSTAL_CODE_LEN, MAX_STREET_LEN, MAX_YEAR_BUILT, MIN_YEAR_BUILT,
};

static ENERGY_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-G](\+{1,4})?$").expect("valid energy label regex"));

static DISTRICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})").expect("valid district regex"));

fn default_schema_version() -> u16 {
    CURRENT_SCHEMA_VERSION
}

/// One listing as produced by a crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RawListing {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    /// Stable external identifier (the listing URL).
    #[serde(alias = "url")]
    #[validate(length(max = 2048))]
    pub identity_key: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub property_type: Option<String>,
    pub price: Option<i64>,
    pub year_built: Option<i32>,
    pub living_area: Option<i32>,
    pub num_rooms: Option<i32>,
    pub status: Option<String>,
    pub listing_date: Option<NaiveDate>,
    pub selling_date: Option<NaiveDate>,
    #[serde(alias = "scraped_at")]
    pub observed_at: Option<DateTime<Utc>>,
    pub energy_label: Option<String>,
}

impl Default for RawListing {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            identity_key: None,
            street: None,
            postal_code: None,
            city: None,
            neighborhood: None,
            property_type: None,
            price: None,
            year_built: None,
            living_area: None,
            num_rooms: None,
            status: None,
            listing_date: None,
            selling_date: None,
            observed_at: None,
            energy_label: None,
        }
    }
}

/// Status a producer may report for a sighting.
///
/// `inactive` and `republished` are lifecycle states owned by the store and
/// never accepted verbatim from producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Sold => "sold",
        }
    }

    /// Parses a producer status; a missing status means the crawler saw the
    /// listing on an "available" page.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            None => Ok(Self::Active),
            Some(s) if s.is_empty() => Ok(Self::Active),
            Some(s) => s.parse(),
        }
    }
}

impl FromStr for ListingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" | "available" | "republished" => Ok(Self::Active),
            "sold" => Ok(Self::Sold),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated sighting of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub identity_key: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub property_type: Option<String>,
    pub price: Option<i64>,
    pub year_built: Option<i32>,
    /// Square meters; never zero or negative.
    pub living_area: Option<i32>,
    pub num_rooms: Option<i32>,
    pub status: ListingStatus,
    pub listing_date: Option<NaiveDate>,
    pub selling_date: Option<NaiveDate>,
    pub observed_at: DateTime<Utc>,
    pub energy_label: Option<String>,
}

impl ListingRecord {
    /// Four-digit district code derived from the postal code.
    pub fn district_code(&self) -> Option<String> {
        self.postal_code.as_deref().and_then(district_code)
    }
}

impl TryFrom<RawListing> for ListingRecord {
    type Error = Error;

    fn try_from(raw: RawListing) -> Result<Self> {
        if raw.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(Error::validation_code(
                ValidationErrorCode::InvalidField,
                format!("unsupported schema_version {}", raw.schema_version),
            ));
        }

        raw.validate().map_err(|e| {
            Error::validation_code(ValidationErrorCode::InvalidField, e.to_string())
        })?;

        let identity_key = clean(raw.identity_key).ok_or_else(|| {
            Error::validation_code(
                ValidationErrorCode::MissingIdentityKey,
                "record has no identity_key",
            )
        })?;
        if identity_key.len() > MAX_IDENTITY_KEY_LEN {
            return Err(Error::validation_code(
                ValidationErrorCode::InvalidField,
                "identity_key too long",
            ));
        }

        let status = ListingStatus::parse(raw.status.as_deref()).map_err(|e| {
            Error::validation_code(ValidationErrorCode::InvalidField, e.to_string())
        })?;

        Ok(Self {
            identity_key,
            street: clean_bounded(raw.street, MAX_STREET_LEN),
            postal_code: clean_bounded(raw.postal_code, MAX_POSTAL_CODE_LEN)
                .map(|p| normalize_postal_code(&p)),
            city: clean_bounded(raw.city, MAX_CITY_LEN),
            neighborhood: clean_bounded(raw.neighborhood, MAX_CITY_LEN),
            property_type: clean_bounded(raw.property_type, MAX_CITY_LEN),
            price: raw.price.filter(|p| *p > 0),
            year_built: coerce_year_built(raw.year_built),
            living_area: coerce_living_area(raw.living_area),
            num_rooms: coerce_num_rooms(raw.num_rooms),
            status,
            listing_date: raw.listing_date,
            selling_date: raw.selling_date,
            observed_at: raw.observed_at.unwrap_or_else(Utc::now),
            energy_label: clean_bounded(raw.energy_label, MAX_ENERGY_LABEL_LEN)
                .as_deref()
                .and_then(normalize_energy_label),
        })
    }
}

/// A living area of zero or less means "unknown".
pub fn coerce_living_area(area: Option<i32>) -> Option<i32> {
    area.filter(|a| *a > 0)
}

/// Implausible construction years (crawlers emit `0` for "not listed").
pub fn coerce_year_built(year: Option<i32>) -> Option<i32> {
    year.filter(|y| (MIN_YEAR_BUILT..=MAX_YEAR_BUILT).contains(y))
}

pub fn coerce_num_rooms(rooms: Option<i32>) -> Option<i32> {
    rooms.filter(|r| (1..=MAX_NUM_ROOMS).contains(r))
}

/// Uppercases and accepts labels `A`..`G` with up to four `+`.
pub fn normalize_energy_label(label: &str) -> Option<String> {
    let label = label.trim().to_ascii_uppercase();
    ENERGY_LABEL.is_match(&label).then_some(label)
}

/// Uppercases and collapses internal whitespace: `"1234  ab"` -> `"1234 AB"`.
pub fn normalize_postal_code(postal_code: &str) -> String {
    postal_code
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

/// First four digits of a postal code.
pub fn district_code(postal_code: &str) -> Option<String> {
    DISTRICT
        .captures(postal_code.trim())
        .map(|c| c[1].to_string())
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Oversized free-text attributes are scraping noise; drop them.
fn clean_bounded(value: Option<String>, max_len: usize) -> Option<String> {
    clean(value).filter(|v| v.len() <= max_len)
}
