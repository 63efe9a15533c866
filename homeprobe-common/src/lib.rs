//! homeprobe common library
//!
//! Shared types and utilities for the homeprobe exporter:
//!
//! - [`sample`] - Metric sample model (`MetricSample`, `Labels`, `MetricSet`)
//! - [`encoder`] - Text exposition encoding
//! - [`naming`] - Metric and label identifier rules
//! - [`config`] - Shared logging configuration
//! - [`error`] - Error types

pub mod config;
pub mod encoder;
pub mod error;
pub mod naming;
pub mod sample;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig};
pub use encoder::{CONTENT_TYPE, encode};
pub use error::{Error, Result};
pub use naming::{
    is_valid_label_name, is_valid_metric_name, sanitize_label_name, sanitize_metric_name,
};
pub use sample::{Labels, MetricKind, MetricSample, MetricSet};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two output
/// formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
