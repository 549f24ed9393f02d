//! Subscriber interface.

use std::sync::Arc;

use async_trait::async_trait;
use listing_core::Result;

use crate::batch::Batch;

/// Receives every batch the queue dispatches.
///
/// An error is logged and counted by the queue; it never reaches the producer
/// or the other subscribers.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, batch: Arc<Batch>) -> Result<()>;
}
