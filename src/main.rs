//! Listing ingestion pipeline
//!
//! Reads crawler output as NDJSON on stdin and runs it through:
//! - Validation and bounded, non-blocking queueing
//! - Retried, transactional persistence with lifecycle tracking
//! - Rate-limited, cached geocoding of new addresses
//! - Notifications for new and republished listings
//!
//! One command per line:
//! `{"op":"batch","records":[...]}`,
//! `{"op":"mark_missing","city":"Utrecht","seen_keys":[...]}`,
//! `{"op":"reset_enrichment","identity_keys":[...]}`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ingest_queue::QueueConfig;
use listing_core::RawListing;
use listing_store::health::{check_connection, init_schema};
use listing_store::{SqliteLifecycleStore, Store, StoreConfig};
use serde::{Deserialize, Serialize};
use telemetry::{health, init_tracing, LoggingConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use worker::{
    EnrichmentConfig, GeocoderConfig, NominatimClient, NotificationConfig,
    NotificationDispatcher, Pipeline, PipelineConfig, ProcessorConfig, ShutdownMode,
};

/// Wait before re-offering a batch the queue turned away.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(250);

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Config {
    #[serde(default)]
    logging: LoggingConfig,

    #[serde(default)]
    store: StoreConfig,

    #[serde(default)]
    geocoder: GeocoderConfig,

    #[serde(default)]
    queue: QueueConfig,

    #[serde(default)]
    processor: ProcessorConfig,

    #[serde(default)]
    enrichment: EnrichmentConfig,

    #[serde(default)]
    notifications: NotificationConfig,

    #[serde(default)]
    pipeline: PipelineSettings,
}

/// Pipeline-wide settings not owned by a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PipelineSettings {
    #[serde(default = "default_metrics_log_interval_secs")]
    metrics_log_interval_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    shutdown_grace_secs: u64,
}

fn default_metrics_log_interval_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            metrics_log_interval_secs: default_metrics_log_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Config {
    fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            queue: self.queue.clone(),
            processor: self.processor.clone(),
            enrichment: self.enrichment.clone(),
            notifications: self.notifications.clone(),
            metrics_log_interval_secs: self.pipeline.metrics_log_interval_secs,
            shutdown_grace_secs: self.pipeline.shutdown_grace_secs,
        }
    }
}

/// One line of producer input.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Batch {
        records: Vec<RawListing>,
    },
    MarkMissing {
        city: String,
        #[serde(default)]
        seen_keys: Vec<String>,
    },
    ResetEnrichment {
        identity_keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = load_config()?;
    init_tracing(&config.logging.clone().with_env_overrides());

    info!("Starting listing ingest v{}", env!("CARGO_PKG_VERSION"));
    info!(
        store = %config.store.url,
        workers = config.processor.worker_count,
        queue_capacity = config.queue.capacity,
        enrichment = config.enrichment.enabled,
        "Loaded configuration"
    );

    let store = Store::connect(&config.store)
        .await
        .context("Failed to open store")?;
    init_schema(&store)
        .await
        .context("Failed to initialize schema")?;
    if !check_connection(&store).await {
        anyhow::bail!("Store is not reachable at {}", config.store.url);
    }

    let geocoder = NominatimClient::new(config.geocoder.clone())
        .context("Failed to create geocoding client")?;
    let notifier = NotificationDispatcher::from_config(&config.notifications)
        .context("Failed to configure notifications")?;
    info!(
        channels = notifier.channel_count(),
        geocoder = %config.geocoder.base_url,
        "Collaborators configured"
    );

    let lifecycle = Arc::new(SqliteLifecycleStore::new(store.clone()));
    let pipeline = Pipeline::start(
        config.pipeline(),
        store.clone(),
        lifecycle,
        Arc::new(geocoder),
        Arc::new(notifier),
    )
    .await
    .context("Failed to start pipeline")?;

    let mode = tokio::select! {
        result = read_commands(&pipeline) => {
            if let Err(e) = result {
                error!(error = %e, "Input failed");
            }
            info!("Input closed, draining");
            ShutdownMode::Drain
        }
        _ = shutdown_signal() => ShutdownMode::Close,
    };

    pipeline.shutdown(mode).await;
    store.close().await;

    let report = health().report();
    info!(
        status = ?report.status,
        geocoder_failures = report.geocoder.consecutive_failures,
        "Shutdown complete"
    );
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables, e.g. LISTINGS__PROCESSOR__WORKER_COUNT
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("LISTINGS")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Feeds stdin into the pipeline until EOF.
async fn read_commands(pipeline: &Pipeline) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let command: Command = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unparseable input line");
                continue;
            }
        };

        match command {
            Command::Batch { records } => submit(pipeline, records).await,
            Command::MarkMissing { city, seen_keys } => {
                let seen: HashSet<String> = seen_keys.into_iter().collect();
                if let Err(e) = pipeline.mark_missing(&city, &seen).await {
                    error!(city = %city, error = %e, "Mark missing failed");
                }
            }
            Command::ResetEnrichment { identity_keys } => {
                if let Err(e) = pipeline.reset_enrichment(&identity_keys).await {
                    error!(error = %e, "Enrichment reset failed");
                }
            }
        }
    }

    Ok(())
}

/// Offers input records in chunks the queue accepts, retrying each chunk
/// until the queue takes it.
///
/// Backpressure is absorbed here, on the producer side.
async fn submit(pipeline: &Pipeline, records: Vec<RawListing>) {
    let max = pipeline.config().queue.max_batch_records.max(1);
    if records.len() > max {
        warn!(records = records.len(), max, "Splitting oversized input batch");
    }

    for chunk in records.chunks(max) {
        loop {
            match pipeline.push_raw(chunk.to_vec()) {
                Ok(receipt) => {
                    if let Some(batch_id) = receipt.batch_id {
                        debug!(
                            batch_id = %batch_id,
                            accepted = receipt.accepted,
                            rejected = receipt.rejected.len(),
                            "Input batch queued"
                        );
                    }
                    break;
                }
                Err(e) if e.is_queue_full() => tokio::time::sleep(QUEUE_FULL_BACKOFF).await,
                Err(e) => {
                    error!(records = chunk.len(), error = %e, "Batch not accepted");
                    break;
                }
            }
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
