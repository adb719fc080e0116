//! Error types for CLS configuration, provisioning and override handling

use crate::servicemanager::ServiceManagerError;
use thiserror::Error;

/// Error type for CLS operations
#[derive(Debug, Error)]
pub enum ClsError {
    /// Configuration could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration parsed but failed validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// No Service Manager credentials for the region
    #[error("no Service Manager credentials for region '{0}'")]
    CredentialsNotFound(String),

    /// A Service Manager call failed
    #[error("{context}: {source}")]
    ServiceManager {
        context: String,
        #[source]
        source: ServiceManagerError,
    },

    /// A binding response lacks an expected credential field
    #[error("binding credentials missing field '{0}'")]
    MissingCredential(&'static str),

    /// A binding response carries a credential of the wrong type
    #[error("invalid binding credentials: {0}")]
    InvalidCredentials(String),

    /// Secret key unusable for encryption
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// Encryption failed
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Ciphertext could not be decrypted or decoded
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Template rendering failed
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Version string could not be parsed
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClsError {
    /// Wrap a Service Manager error with call context
    pub fn service_manager(context: impl Into<String>, source: ServiceManagerError) -> Self {
        ClsError::ServiceManager {
            context: context.into(),
            source,
        }
    }

    /// True when retrying the same call later may succeed
    pub fn is_temporary(&self) -> bool {
        match self {
            ClsError::ServiceManager { source, .. } => source.is_temporary(),
            _ => false,
        }
    }
}

/// Result type for CLS operations
pub type Result<T> = std::result::Result<T, ClsError>;
