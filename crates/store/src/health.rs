//! Store health checks and schema setup.

use listing_core::Result;
use telemetry::health;
use tracing::{debug, error};

use crate::client::{db_error, Store};
use crate::schema::all_tables;

/// Runs `SELECT 1` and records the result in the health registry.
pub async fn check_connection(store: &Store) -> bool {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(store.pool())
        .await
    {
        Ok(_) => {
            debug!("Listing store healthy");
            health().store.set_healthy();
            true
        }
        Err(e) => {
            error!("Listing store health check failed: {}", e);
            health().store.set_unhealthy(e.to_string());
            false
        }
    }
}

/// Creates tables, indexes and triggers if they do not exist.
pub async fn init_schema(store: &Store) -> Result<()> {
    for ddl in all_tables() {
        sqlx::query(ddl)
            .execute(store.pool())
            .await
            .map_err(db_error)?;
    }

    debug!("Listing store schema initialized");
    Ok(())
}
