//! Error types for train-manager operations.
//!
//! Errors are grouped by subsystem:
//! - Docker container lifecycle (build, create, stop/remove, poll)
//! - Metric range queries against the metrics backend
//! - Usage report persistence

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during Docker operations.
///
/// Build and creation failures are fatal for a run. A missing container is
/// reported as [`DockerError::ContainerNotFound`] so that callers can treat
/// absence as a normal outcome.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Failed to create container '{name}': {reason}")]
    CreationFailed { name: String, reason: String },

    #[error("Container '{name}' not found")]
    ContainerNotFound { name: String },

    #[error("Docker {operation} failed for '{name}': {reason}")]
    OperationFailed {
        operation: &'static str,
        name: String,
        reason: String,
    },

    #[error("Container '{name}' still running after {timeout:?}")]
    WaitTimeout { name: String, timeout: Duration },

    #[error("Invalid resource limits: {0}")]
    InvalidLimits(String),

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DockerError {
    /// Returns true when the error means the container does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DockerError::ContainerNotFound { .. })
    }

    pub(crate) fn operation(
        operation: &'static str,
        name: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        DockerError::OperationFailed {
            operation,
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that can occur while querying the metrics backend.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Metrics backend returned HTTP {code}: {body}")]
    HttpStatus { code: u16, body: String },

    #[error("Metrics backend reported {error_type}: {message}")]
    BackendError { error_type: String, message: String },

    #[error("Failed to parse metrics response: {0}")]
    ParseError(String),

    #[error("No data returned for query {0}")]
    NoData(String),
}

/// Errors that can occur while persisting a usage report.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
