//! Error types for model validation

use thiserror::Error;

/// Errors raised while validating or decoding records
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Invalid field value
    #[error("invalid value for field '{field}': {message}")]
    InvalidFieldValue { field: String, message: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
