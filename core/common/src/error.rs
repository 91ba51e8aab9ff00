//! Common error types for tallyfeed.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Upstream error code reported while a derived product is still being generated.
pub const PRODUCT_NOT_READY: &str = "PRODUCT_NOT_READY";

/// Structured error body returned by the upstream aggregation API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Broad category (e.g. `ITEM_ERROR`, `INVALID_REQUEST`).
    #[serde(default)]
    pub error_type: String,
    /// Specific machine-readable code.
    #[serde(default)]
    pub error_code: String,
    /// Developer-facing message.
    #[serde(default)]
    pub error_message: String,
    /// Message safe to show to end users, if any.
    #[serde(default)]
    pub display_message: Option<String>,
    /// Upstream request identifier for support tickets.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ApiError {
    /// Whether this error means the requested product is still being generated.
    ///
    /// This is the only upstream condition treated as "not ready"; every
    /// other code is fatal.
    pub fn is_not_ready(&self) -> bool {
        self.error_code == PRODUCT_NOT_READY
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.error_code, self.error_type, self.error_message)
    }
}

/// Top-level error type for tallyfeed operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Upstream resource is still being generated.
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Gave up waiting for a not-ready resource.
    #[error("Retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// External cancellation was honored.
    #[error("Operation cancelled")]
    Cancelled,

    /// A change-feed page could not be fetched; the pass is aborted.
    #[error("Feed fetch failed for item {item} at cursor {cursor:?}: {message}")]
    FeedFetchFailed {
        item: String,
        cursor: String,
        message: String,
    },

    /// Report creation failed.
    #[error("Report creation failed: {0}")]
    CreationFailed(String),

    /// Upstream reported the report job as failed.
    #[error("Report failed: {0}")]
    ReportFailed(String),

    /// Structured upstream API error.
    #[error("Upstream error: {0}")]
    Upstream(ApiError),

    /// Transport-level failure talking to the upstream.
    #[error("Network error: {0}")]
    Network(String),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An upstream record could not be normalized.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether the caller should present this as "try again later".
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. })
    }

    /// Whether this error is the upstream not-ready signal.
    pub fn is_not_ready(&self) -> bool {
        match self {
            Error::NotReady(_) => true,
            Error::Upstream(api) => api.is_not_ready(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
