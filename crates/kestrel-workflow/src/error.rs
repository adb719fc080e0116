//! Error types for the workflow engine

use crate::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

/// Error type for pipeline and worker failures
///
/// Step failures are not errors at this level: a step reports them through
/// its outcome and the operation is marked failed in the store.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Operation not found
    #[error("operation not found: {0}")]
    NotFound(Uuid),

    /// Invalid settings
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation store error
    #[error("operation store error: {0}")]
    Store(#[from] StoreError),

    /// Operation failed model validation
    #[error("invalid operation: {0}")]
    InvalidOperation(#[from] kestrel_model::ModelError),
}

impl WorkflowError {
    /// Whether running the operation again later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Store(e) if !matches!(e, StoreError::NotFound(_)))
    }
}

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
