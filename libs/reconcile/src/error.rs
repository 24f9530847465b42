//! Reconciliation error types.

use semsync_store::StoreError;
use thiserror::Error;

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The capacity record does not exist. Records are never created here.
    #[error("capacity record {namespace}/{name} not found")]
    RecordNotFound { namespace: String, name: String },

    /// A workflow disappeared between discovery and wake.
    #[error("workflow {namespace}/{name} not found")]
    WorkflowNotFound { namespace: String, name: String },

    /// The object store failed (transport, auth, server or decode error).
    #[error("object store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// A namespace or object name the store cannot address.
    #[error(transparent)]
    InvalidName(StoreError),

    /// The object store has no usable credentials.
    #[error("cluster configuration missing: {0}")]
    ConfigurationMissing(String),
}

impl ReconcileError {
    /// Map a store error that has no object-specific meaning.
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::ConfigurationMissing(msg) => Self::ConfigurationMissing(msg),
            invalid @ StoreError::InvalidName { .. } => Self::InvalidName(invalid),
            other => Self::StoreUnavailable(other),
        }
    }

    /// Map a store error from an operation on the named capacity record.
    pub(crate) fn from_record_op(err: StoreError, namespace: &str, name: &str) -> Self {
        if err.is_not_found() {
            return Self::RecordNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            };
        }
        Self::from_store(err)
    }

    /// Map a store error from an operation on the named workflow.
    pub(crate) fn from_workflow_op(err: StoreError, namespace: &str, name: &str) -> Self {
        if err.is_not_found() {
            return Self::WorkflowNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            };
        }
        Self::from_store(err)
    }

    /// Returns true for the not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RecordNotFound { .. } | Self::WorkflowNotFound { .. }
        )
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RecordNotFound { .. } => "record_not_found",
            Self::WorkflowNotFound { .. } => "workflow_not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::InvalidName(_) => "invalid_name",
            Self::ConfigurationMissing(_) => "configuration_missing",
        }
    }
}
