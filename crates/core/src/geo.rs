//! Geographic value types shared by the store and the enrichment stage.

use serde::{Deserialize, Serialize};

/// WGS84 latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Rectangle used to reject geocoder hits outside the covered country.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// The Netherlands.
    pub const NETHERLANDS: Self = Self {
        min_lat: 50.75,
        max_lat: 53.55,
        min_lon: 3.35,
        max_lon: 7.22,
    };

    pub fn contains(&self, c: Coordinates) -> bool {
        c.lat >= self.min_lat && c.lat <= self.max_lat && c.lon >= self.min_lon && c.lon <= self.max_lon
    }
}

/// Address handed to the geocoder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressQuery {
    pub street: String,
    pub postal_code: String,
    pub city: String,
}

impl AddressQuery {
    pub fn new(
        street: impl Into<String>,
        postal_code: impl Into<String>,
        city: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            postal_code: postal_code.into(),
            city: city.into(),
        }
    }

    /// Cache key: lowercased, whitespace-collapsed, postal code without spaces.
    ///
    /// `("Damstraat  1", "1012 JM", "Amsterdam")` -> `"damstraat 1|1012jm|amsterdam"`
    pub fn cache_key(&self) -> String {
        let squash = |s: &str| {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        };
        let postal: String = self
            .postal_code
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        format!("{}|{}|{}", squash(&self.street), postal, squash(&self.city))
    }

    /// Free-form query string for the external service.
    /// Empty parts are left out.
    pub fn to_query(&self, country: &str) -> String {
        [
            self.street.trim(),
            self.postal_code.trim(),
            self.city.trim(),
            country,
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
    }
}
