//! Listing batches.

use chrono::{DateTime, Utc};
use listing_core::{Error, ListingRecord, RawListing};
use serde::Serialize;
use uuid::Uuid;

/// An ordered group of validated records persisted in one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: Uuid,
    pub records: Vec<ListingRecord>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(records: Vec<ListingRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            records,
            created_at: Utc::now(),
        }
    }

    /// Validates raw crawler output, keeping every record that converts.
    ///
    /// Rejected records are reported by their position in `raws`.
    pub fn from_raw(raws: Vec<RawListing>) -> (Self, Vec<RejectedRecord>) {
        let mut records = Vec::with_capacity(raws.len());
        let mut rejected = Vec::new();

        for (index, raw) in raws.into_iter().enumerate() {
            let identity_key = raw.identity_key.clone();
            match ListingRecord::try_from(raw) {
                Ok(record) => records.push(record),
                Err(e) => rejected.push(RejectedRecord::new(index, identity_key, &e)),
            }
        }

        (Self::new(records), rejected)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn identity_keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.identity_key.as_str())
    }
}

/// A raw record that failed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub identity_key: Option<String>,
    pub code: Option<&'static str>,
    pub reason: String,
}

impl RejectedRecord {
    fn new(index: usize, identity_key: Option<String>, error: &Error) -> Self {
        Self {
            index,
            identity_key,
            code: error.error_code(),
            reason: error.to_string(),
        }
    }
}

/// What happened to a pushed group of raw records.
#[derive(Debug, Clone, Serialize)]
pub struct PushReceipt {
    /// `None` when every record was rejected and nothing was enqueued.
    pub batch_id: Option<Uuid>,
    pub accepted: usize,
    pub rejected: Vec<RejectedRecord>,
}
