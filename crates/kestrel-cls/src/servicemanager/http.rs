//! HTTP Service Manager client
//!
//! Talks to the Service Manager OSB proxy at
//! `{url}/v1/osb/{broker_id}/v2/service_instances/...` with basic auth.

use super::{
    BindingResponse, ClientFactory, OperationResponse, ProvisioningInput, ServiceManagerClient,
    ServiceManagerError,
};
use crate::config::Credentials;
use async_trait::async_trait;
use kestrel_model::InstanceKey;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// OSB API version sent with every request
const BROKER_API_VERSION: &str = "2.14";

/// Default per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry classification of an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Temporary,
    Permanent,
}

/// Classify a response status for retry decisions
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        408 | 429 => StatusClass::Temporary,
        500..=599 => StatusClass::Temporary,
        _ => StatusClass::Permanent,
    }
}

/// Service Manager client over HTTP
#[derive(Debug, Clone)]
pub struct HttpServiceManagerClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpServiceManagerClient {
    /// Create a client with the default request timeout
    pub fn new(credentials: &Credentials) -> Result<Self, ServiceManagerError> {
        Self::with_timeout(credentials, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, ServiceManagerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceManagerError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: credentials.url.trim_end_matches('/').to_string(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        })
    }

    fn instance_url(&self, broker_id: &str, instance_id: &str) -> String {
        format!(
            "{}/v1/osb/{}/v2/service_instances/{}",
            self.base_url, broker_id, instance_id
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.username, Some(&self.password))
            .header("X-Broker-API-Version", BROKER_API_VERSION)
    }

    async fn send<T: DeserializeOwned + Default>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ServiceManagerError> {
        let response = self.authorize(request).send().await.map_err(transport_error)?;
        decode(response).await
    }
}

/// Timeouts, refused or dropped connections and interrupted bodies are
/// worth retrying; anything else is a problem with the request itself
fn transport_error(err: reqwest::Error) -> ServiceManagerError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ServiceManagerError::Temporary(err.to_string())
    } else {
        ServiceManagerError::Request(err.to_string())
    }
}

async fn decode<T: DeserializeOwned + Default>(
    response: Response,
) -> Result<T, ServiceManagerError> {
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| {
        ServiceManagerError::Temporary(format!("failed to read response body: {}", e))
    })?;

    if classify_status(status) != StatusClass::Success {
        return Err(ServiceManagerError::Status {
            status,
            message: body,
        });
    }

    if body.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&body).map_err(|e| ServiceManagerError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ServiceManagerClient for HttpServiceManagerClient {
    async fn provision(
        &self,
        broker_id: &str,
        input: &ProvisioningInput,
        accepts_incomplete: bool,
    ) -> Result<OperationResponse, ServiceManagerError> {
        let url = self.instance_url(broker_id, &input.id);
        debug!(url = %url, "Provisioning service instance");
        let request = self
            .client
            .put(url)
            .query(&[("accepts_incomplete", accepts_incomplete)])
            .json(input);
        self.send(request).await
    }

    async fn bind(
        &self,
        instance: &InstanceKey,
        binding_id: &str,
        parameters: &serde_json::Value,
        accepts_incomplete: bool,
    ) -> Result<BindingResponse, ServiceManagerError> {
        let url = format!(
            "{}/service_bindings/{}",
            self.instance_url(&instance.broker_id, &instance.instance_id),
            binding_id
        );
        debug!(url = %url, "Creating service binding");
        let body = serde_json::json!({
            "service_id": instance.service_id,
            "plan_id": instance.plan_id,
            "parameters": parameters,
        });
        let request = self
            .client
            .put(url)
            .query(&[("accepts_incomplete", accepts_incomplete)])
            .json(&body);
        self.send(request).await
    }

    async fn deprovision(
        &self,
        instance: &InstanceKey,
        accepts_incomplete: bool,
    ) -> Result<OperationResponse, ServiceManagerError> {
        let url = self.instance_url(&instance.broker_id, &instance.instance_id);
        debug!(url = %url, "Deprovisioning service instance");
        let request = self.client.delete(url).query(&[
            ("service_id", instance.service_id.as_str()),
            ("plan_id", instance.plan_id.as_str()),
            ("accepts_incomplete", if accepts_incomplete { "true" } else { "false" }),
        ]);
        self.send(request).await
    }
}

/// Builds an HTTP client per credentials record
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    timeout: Duration,
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self {
            timeout: REQUEST_TIMEOUT,
        }
    }
}

impl HttpClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ClientFactory for HttpClientFactory {
    fn for_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ServiceManagerClient>, ServiceManagerError> {
        Ok(Arc::new(HttpServiceManagerClient::with_timeout(
            credentials,
            self.timeout,
        )?))
    }
}
