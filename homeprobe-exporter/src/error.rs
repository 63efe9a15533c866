//! Probe errors and their HTTP mapping.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while answering a probe request.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Missing query parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Unknown target '{0}'")]
    UnknownTarget(String),

    #[error("Unknown module '{module}' for target '{target}'")]
    UnknownModule { target: String, module: String },

    #[error("Authentication with {target} failed: {reason}")]
    AuthenticationFailed { target: String, reason: String },

    #[error("Backend {target} unreachable: {reason}")]
    BackendUnreachable { target: String, reason: String },

    #[error("Malformed response from {target}: {reason}")]
    MalformedUpstreamResponse { target: String, reason: String },

    #[error("Failed to encode metrics: {0}")]
    Encode(#[from] homeprobe_common::Error),
}

impl ProbeError {
    pub fn auth_failed(target: &str, reason: impl ToString) -> Self {
        ProbeError::AuthenticationFailed {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn unreachable(target: &str, reason: impl ToString) -> Self {
        ProbeError::BackendUnreachable {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(target: &str, reason: impl ToString) -> Self {
        ProbeError::MalformedUpstreamResponse {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status answered for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProbeError::MissingParameter(_)
            | ProbeError::UnknownTarget(_)
            | ProbeError::UnknownModule { .. } => StatusCode::NOT_FOUND,
            ProbeError::AuthenticationFailed { .. } | ProbeError::BackendUnreachable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProbeError::MalformedUpstreamResponse { .. } => StatusCode::BAD_GATEWAY,
            ProbeError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short kind name used in logs and self-metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::MissingParameter(_) => "missing_parameter",
            ProbeError::UnknownTarget(_) => "unknown_target",
            ProbeError::UnknownModule { .. } => "unknown_module",
            ProbeError::AuthenticationFailed { .. } => "authentication_failed",
            ProbeError::BackendUnreachable { .. } => "backend_unreachable",
            ProbeError::MalformedUpstreamResponse { .. } => "malformed_upstream_response",
            ProbeError::Encode(_) => "encode",
        }
    }
}
