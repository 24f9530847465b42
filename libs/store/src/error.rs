//! Object store error types.

use thiserror::Error;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Object store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The cluster API answered with a non-success status.
    #[error("cluster API returned {status}: {message}")]
    Api {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    /// The request never produced a response (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A namespace or object name that cannot be addressed.
    #[error("invalid {field} {value:?}")]
    InvalidName { field: &'static str, value: String },

    /// Cluster credentials are absent or unusable.
    #[error("cluster configuration missing: {0}")]
    ConfigurationMissing(String),
}

impl StoreError {
    /// Returns true if the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the error is caused by missing credentials.
    pub fn is_configuration_missing(&self) -> bool {
        matches!(self, Self::ConfigurationMissing(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
