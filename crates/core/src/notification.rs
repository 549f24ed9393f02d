//! Payload handed to the outbound notification collaborator.

use serde::{Deserialize, Serialize};

use crate::property::{PropertyRecord, Transition};

/// Why a property is being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Inserted,
    Republished,
}

impl NotificationKind {
    pub fn from_transition(transition: Transition) -> Option<Self> {
        match transition {
            Transition::Created => Some(Self::Inserted),
            Transition::Republished => Some(Self::Republished),
            Transition::Updated | Transition::Sold => None,
        }
    }
}

/// Full enriched record of a newly inserted or republished property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyNotification {
    pub kind: NotificationKind,
    pub property: PropertyRecord,
    pub price_per_sqm: Option<f64>,
    pub district_code: Option<String>,
}

impl PropertyNotification {
    pub fn new(kind: NotificationKind, property: PropertyRecord) -> Self {
        Self {
            kind,
            price_per_sqm: property.price_per_sqm(),
            district_code: property.district_code(),
            property,
        }
    }
}
