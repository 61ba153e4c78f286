//! Error taxonomy for the webhook and metrics pipelines.

use std::path::PathBuf;

use thiserror::Error;

/// Persistence failure. Propagated to the caller; a failed write inside a
/// scheduler tick only marks that tick as failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool unavailable: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("webhook {0} not found")]
    NotFound(i64),
}

/// Fatal problem that prevents a deployment from starting at all.
///
/// Step failures (non-zero exit, timeout) are not errors: they are part of
/// the deploy report and end up as a `failed` outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("deployment path does not exist: {}", .0.display())]
    PathMissing(PathBuf),

    #[error("invalid deploy user: {0:?}")]
    InvalidDeployUser(String),

    #[error("deployment task aborted: {0}")]
    Aborted(String),
}

/// Delivery body that is neither JSON nor a form carrying a JSON `payload`.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid form body: {0}")]
    Form(#[from] serde_urlencoded::de::Error),
}

/// The sampler could not collect a single sub-metric.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("no system metrics available under {}", .0.display())]
    Unavailable(PathBuf),
}

/// Rejected endpoint configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field}: {message}")]
    Field {
        field: &'static str,
        message: String,
    },
}

impl ValidationError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Field {
            field,
            message: message.into(),
        }
    }
}
