//! Structured logging setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The `[logging]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. "info,worker=debug"
    #[serde(default = "default_filter")]
    pub filter: String,
    /// One JSON object per line instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Per-statement sqlx logging and HTTP client internals drown out pipeline events.
fn default_filter() -> String {
    "info,sqlx=warn,hyper=warn,reqwest=warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Defaults with `RUST_LOG` and `LOG_JSON` applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// `RUST_LOG` replaces the filter; `LOG_JSON` toggles JSON output.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                self.filter = filter;
            }
        }
        if let Ok(json) = std::env::var("LOG_JSON") {
            self.json = parse_flag(&json);
        }
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(default_filter()))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Installs the global subscriber.
///
/// Returns `false` if one was already installed (tests, repeated calls).
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let installed = if config.json {
        tracing_subscriber::registry()
            .with(config.env_filter())
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(config.env_filter())
            .with(fmt::layer().with_target(true))
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(filter = %config.filter, json = config.json, "Tracing initialized");
    }
    installed
}

/// Installs the subscriber from `RUST_LOG`/`LOG_JSON` alone.
pub fn init_tracing_from_env() -> bool {
    init_tracing(&LoggingConfig::from_env())
}
