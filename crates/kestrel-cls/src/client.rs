//! CLS-specific Service Manager calls
//!
//! `ClsClient` shapes requests for the logging service and interprets the
//! responses. The Service Manager handle is passed per call because
//! credentials differ per region.

use crate::config::{Config, SamlConfig};
use crate::error::{ClsError, Result};
use crate::overrides::OverrideParams;
use crate::servicemanager::{ProvisioningInput, ServiceManagerClient};
use kestrel_model::InstanceKey;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Platform tag sent in the provisioning context
const PLATFORM: &str = "kubernetes";

/// Identifies the binding to create
#[derive(Debug, Clone, PartialEq)]
pub struct BindingRequest {
    pub instance_key: InstanceKey,
    pub binding_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters<'a> {
    retention_period: u32,
    max_data_instances: u32,
    max_ingest_instances: u32,
    es_api_enabled: bool,
    saml: SamlParameters<'a>,
}

#[derive(Debug, Serialize)]
struct SamlParameters<'a> {
    enabled: bool,
    #[serde(flatten)]
    config: &'a SamlConfig,
}

/// Performs CLS calls through a generic Service Manager client
#[derive(Debug, Clone)]
pub struct ClsClient {
    config: Arc<Config>,
}

impl ClsClient {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn parameters(&self) -> Result<serde_json::Value> {
        let params = Parameters {
            retention_period: self.config.retention_period,
            max_data_instances: self.config.max_data_instances,
            max_ingest_instances: self.config.max_ingest_instances,
            es_api_enabled: false,
            saml: SamlParameters {
                enabled: true,
                config: &self.config.saml,
            },
        };
        Ok(serde_json::to_value(params)?)
    }

    /// Ask the Service Manager to create a CLS instance
    pub async fn create_instance(
        &self,
        sm: &dyn ServiceManagerClient,
        instance: &InstanceKey,
    ) -> Result<()> {
        let input = ProvisioningInput {
            id: instance.instance_id.clone(),
            service_id: instance.service_id.clone(),
            plan_id: instance.plan_id.clone(),
            organization_guid: Uuid::new_v4().to_string(),
            space_guid: Uuid::new_v4().to_string(),
            context: json!({ "platform": PLATFORM }),
            parameters: self.parameters()?,
        };

        let response = sm
            .provision(&instance.broker_id, &input, true)
            .await
            .map_err(|e| {
                ClsError::service_manager(
                    format!("while provisioning a CLS instance {}", instance.instance_id),
                    e,
                )
            })?;

        info!(
            instance = %instance.instance_id,
            sm_operation = ?response.operation,
            "CLS instance provisioning requested"
        );
        Ok(())
    }

    /// Create a binding and extract the fluent-bit credentials from it
    pub async fn create_binding(
        &self,
        sm: &dyn ServiceManagerClient,
        request: &BindingRequest,
    ) -> Result<OverrideParams> {
        let response = sm
            .bind(&request.instance_key, &request.binding_id, &json!({}), false)
            .await
            .map_err(|e| ClsError::service_manager("while creating a CLS binding", e))?;

        debug!(
            instance = %request.instance_key.instance_id,
            binding = %request.binding_id,
            "CLS binding created"
        );
        OverrideParams::from_credentials(&response.credentials)
    }

    /// Ask the Service Manager to remove a CLS instance
    pub async fn remove_instance(
        &self,
        sm: &dyn ServiceManagerClient,
        instance: &InstanceKey,
    ) -> Result<()> {
        sm.deprovision(instance, true).await.map_err(|e| {
            ClsError::service_manager(
                format!("while deprovisioning a CLS instance {}", instance.instance_id),
                e,
            )
        })?;

        info!(instance = %instance.instance_id, "CLS instance deprovisioning requested");
        Ok(())
    }
}
