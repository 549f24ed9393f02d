//! Queue configuration.

use listing_core::limits::{DEFAULT_MAX_BATCH_RECORDS, DEFAULT_QUEUE_CAPACITY};
use serde::{Deserialize, Serialize};

/// Ingestion queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of batches buffered before producers see `QUEUE_001`
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Largest batch accepted, in records
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,
}

fn default_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_batch_records() -> usize {
    DEFAULT_MAX_BATCH_RECORDS
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_batch_records: default_max_batch_records(),
        }
    }
}

impl QueueConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_batch_records(mut self, max: usize) -> Self {
        self.max_batch_records = max;
        self
    }
}
