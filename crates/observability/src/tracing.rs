//! Tracing/logging initialization.
//!
//! Store, repository and cluster operations emit `tracing` events and spans
//! with structured fields (`aggregate_type`, `aggregate_id`, `event_count`).
//! Nothing is printed until a subscriber is installed here.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human readable single-line output.
    Compact,
}

/// Settings for [`init`], deserializable from an application's config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Filter directives used when `RUST_LOG` is not set.
    pub default_filter: String,
    pub format: LogFormat,
    /// Include the module path of each event.
    pub with_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            format: LogFormat::Json,
            with_target: false,
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// `RUST_LOG` takes precedence over `config.default_filter`. Safe to call
/// multiple times (subsequent calls are no-ops).
pub fn init(config: &TracingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(config.with_target);

    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
}
