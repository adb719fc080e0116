//! Service Manager capability interface
//!
//! The Service Manager exposes Open Service Broker calls for every
//! registered broker. Only the three calls the CLS workflow needs are
//! modelled here; implementations own transport, timeouts and auth.

mod fake;
mod http;

pub use fake::{FakeClientFactory, FakeServiceManager};
pub use http::{classify_status, HttpClientFactory, HttpServiceManagerClient, StatusClass};

use crate::config::Credentials;
use async_trait::async_trait;
use kestrel_model::InstanceKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by a Service Manager call
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceManagerError {
    /// Transient transport failure (timeout, refused connection)
    #[error("temporary service manager error: {0}")]
    Temporary(String),

    /// Non-success HTTP status
    #[error("service manager returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Request could not be built or sent
    #[error("service manager request failed: {0}")]
    Request(String),

    /// Response body could not be decoded
    #[error("invalid service manager response: {0}")]
    InvalidResponse(String),
}

impl ServiceManagerError {
    /// True when the same call may succeed if retried later
    pub fn is_temporary(&self) -> bool {
        match self {
            ServiceManagerError::Temporary(_) => true,
            ServiceManagerError::Status { status, .. } => {
                classify_status(*status) == StatusClass::Temporary
            }
            _ => false,
        }
    }
}

/// Body of an OSB provision request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisioningInput {
    /// Instance ID; goes into the request path
    #[serde(skip)]
    pub id: String,
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    pub context: serde_json::Value,
    pub parameters: serde_json::Value,
}

/// Response of an asynchronous provision or deprovision call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OperationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Response of a bind call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BindingResponse {
    #[serde(default)]
    pub credentials: serde_json::Map<String, serde_json::Value>,
}

/// Service Manager calls used by the CLS workflow
#[async_trait]
pub trait ServiceManagerClient: Send + Sync {
    /// Provision an instance through the given broker
    async fn provision(
        &self,
        broker_id: &str,
        input: &ProvisioningInput,
        accepts_incomplete: bool,
    ) -> Result<OperationResponse, ServiceManagerError>;

    /// Create a binding; repeated calls with the same binding ID are idempotent
    async fn bind(
        &self,
        instance: &InstanceKey,
        binding_id: &str,
        parameters: &serde_json::Value,
        accepts_incomplete: bool,
    ) -> Result<BindingResponse, ServiceManagerError>;

    /// Deprovision an instance
    async fn deprovision(
        &self,
        instance: &InstanceKey,
        accepts_incomplete: bool,
    ) -> Result<OperationResponse, ServiceManagerError>;
}

/// Builds a Service Manager client for a region's credentials
pub trait ClientFactory: Send + Sync {
    fn for_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ServiceManagerClient>, ServiceManagerError>;
}
