//! Error taxonomy for the query path.
//!
//! Every way a query can fail is a distinct variant so the HTTP layer can
//! pick a status code without inspecting message text.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Message used when the indexing service reports `error` without a text.
pub const GENERIC_SERVICE_ERROR: &str = "the indexing service reported an unspecified error";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// Bad or missing input. Raised before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The indexing service marked the request as failed.
    #[error("indexing service error: {0}")]
    ExternalService(String),

    /// No terminal state was observed in time.
    #[error("query timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The change feed for the request failed or ended.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// The pending request could not be written.
    #[error("store error: {0}")]
    Store(String),
}

impl QueryError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Builds an [`ExternalService`](Self::ExternalService) error, falling
    /// back to [`GENERIC_SERVICE_ERROR`] when the service gave no message.
    pub fn external_service(message: Option<&str>) -> Self {
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(GENERIC_SERVICE_ERROR);
        Self::ExternalService(message.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            QueryError::ExternalService(_)
            | QueryError::Timeout(_)
            | QueryError::Subscription(_)
            | QueryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
