use thiserror::Error;

/// Common error type for homeprobe components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid metric name: {0}")]
    InvalidMetricName(String),

    #[error("Invalid label name '{label}' on metric {metric}")]
    InvalidLabelName { metric: String, label: String },

    #[error("Duplicate label '{label}' on metric {metric}")]
    DuplicateLabel { metric: String, label: String },

    #[error("Conflicting declarations for metric family {0}")]
    ConflictingFamily(String),
}

/// Result type alias using homeprobe's Error.
pub type Result<T> = std::result::Result<T, Error>;
