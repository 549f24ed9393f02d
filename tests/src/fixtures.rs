//! Raw listing builders.

use chrono::{DateTime, Utc};
use listing_core::{AddressQuery, Coordinates, RawListing};

/// A valid active listing in Utrecht.
pub fn listing(key: &str) -> RawListing {
    RawListing {
        schema_version: 1,
        identity_key: Some(key.to_string()),
        street: Some("Oudegracht 1".to_string()),
        postal_code: Some("3511 AB".to_string()),
        city: Some("Utrecht".to_string()),
        property_type: Some("apartment".to_string()),
        price: Some(500_000),
        living_area: Some(80),
        num_rooms: Some(3),
        status: Some("active".to_string()),
        energy_label: Some("a".to_string()),
        ..Default::default()
    }
}

pub fn listing_with_price(key: &str, price: i64) -> RawListing {
    RawListing {
        price: Some(price),
        ..listing(key)
    }
}

pub fn sold_listing(key: &str) -> RawListing {
    RawListing {
        status: Some("sold".to_string()),
        ..listing(key)
    }
}

pub fn listing_at(key: &str, street: &str, city: &str) -> RawListing {
    RawListing {
        street: Some(street.to_string()),
        city: Some(city.to_string()),
        ..listing(key)
    }
}

pub fn observed(raw: RawListing, at: DateTime<Utc>) -> RawListing {
    RawListing {
        observed_at: Some(at),
        ..raw
    }
}

/// Listing with no identity key; rejected at the queue.
pub fn keyless_listing() -> RawListing {
    RawListing {
        identity_key: None,
        ..listing("ignored")
    }
}

/// `n` distinct listings keyed `{prefix}-{i}`.
pub fn listings(prefix: &str, n: usize) -> Vec<RawListing> {
    (0..n)
        .map(|i| listing_at(&format!("{}-{}", prefix, i), &format!("Oudegracht {}", i + 1), "Utrecht"))
        .collect()
}

/// Address of a raw listing, as the sweeper would look it up.
pub fn address_of(raw: &RawListing) -> AddressQuery {
    AddressQuery::new(
        raw.street.clone().unwrap_or_default(),
        raw.postal_code.clone().unwrap_or_default(),
        raw.city.clone().unwrap_or_default(),
    )
}

pub fn utrecht() -> Coordinates {
    Coordinates {
        lat: 52.0907,
        lon: 5.1214,
    }
}
