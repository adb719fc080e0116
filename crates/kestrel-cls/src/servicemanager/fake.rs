//! In-process Service Manager
//!
//! Records every call and honours the OSB idempotency contract: binding the
//! same binding ID twice returns the same credentials. Scripted failures can
//! be queued per call kind. Used by tests and the `demo` command.

use super::{
    BindingResponse, ClientFactory, OperationResponse, ProvisioningInput, ServiceManagerClient,
    ServiceManagerError,
};
use crate::config::Credentials;
use async_trait::async_trait;
use kestrel_model::InstanceKey;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct FakeState {
    provisions: Vec<(String, ProvisioningInput)>,
    binds: Vec<(InstanceKey, String)>,
    deprovisions: Vec<InstanceKey>,
    bindings: HashMap<String, Map<String, Value>>,
    provision_failures: VecDeque<ServiceManagerError>,
    bind_failures: VecDeque<ServiceManagerError>,
    deprovision_failures: VecDeque<ServiceManagerError>,
    bind_credentials: Option<Map<String, Value>>,
}

/// Fake Service Manager recording calls
#[derive(Debug, Default)]
pub struct FakeServiceManager {
    state: Mutex<FakeState>,
}

impl FakeServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Credentials returned by the next new bindings
    pub fn with_bind_credentials(self, credentials: Map<String, Value>) -> Self {
        self.lock().bind_credentials = Some(credentials);
        self
    }

    /// Fail the next provision call
    pub fn fail_next_provision(&self, err: ServiceManagerError) {
        self.lock().provision_failures.push_back(err);
    }

    /// Fail the next bind call
    pub fn fail_next_bind(&self, err: ServiceManagerError) {
        self.lock().bind_failures.push_back(err);
    }

    /// Fail the next deprovision call
    pub fn fail_next_deprovision(&self, err: ServiceManagerError) {
        self.lock().deprovision_failures.push_back(err);
    }

    pub fn provision_calls(&self) -> Vec<(String, ProvisioningInput)> {
        self.lock().provisions.clone()
    }

    pub fn bind_calls(&self) -> Vec<(InstanceKey, String)> {
        self.lock().binds.clone()
    }

    pub fn deprovision_calls(&self) -> Vec<InstanceKey> {
        self.lock().deprovisions.clone()
    }

    /// Default credentials shaped like a CLS binding
    pub fn default_bind_credentials(binding_id: &str) -> Map<String, Value> {
        let value = json!({
            "Fluentd-endpoint": format!("fluentd-{}.cls.example.com", binding_id),
            "Fluentd-username": format!("user-{}", binding_id),
            "Fluentd-password": format!("pass-{}", binding_id),
            "Kibana-endpoint": format!("https://kibana-{}.cls.example.com", binding_id),
        });
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[async_trait]
impl ServiceManagerClient for FakeServiceManager {
    async fn provision(
        &self,
        broker_id: &str,
        input: &ProvisioningInput,
        _accepts_incomplete: bool,
    ) -> Result<OperationResponse, ServiceManagerError> {
        let mut state = self.lock();
        state.provisions.push((broker_id.to_string(), input.clone()));
        if let Some(err) = state.provision_failures.pop_front() {
            return Err(err);
        }
        Ok(OperationResponse {
            operation: Some(format!("provision-{}", input.id)),
        })
    }

    async fn bind(
        &self,
        instance: &InstanceKey,
        binding_id: &str,
        _parameters: &Value,
        _accepts_incomplete: bool,
    ) -> Result<BindingResponse, ServiceManagerError> {
        let mut state = self.lock();
        state.binds.push((instance.clone(), binding_id.to_string()));
        if let Some(err) = state.bind_failures.pop_front() {
            return Err(err);
        }
        let template = state.bind_credentials.clone();
        let credentials = state
            .bindings
            .entry(binding_id.to_string())
            .or_insert_with(|| template.unwrap_or_else(|| Self::default_bind_credentials(binding_id)))
            .clone();
        Ok(BindingResponse { credentials })
    }

    async fn deprovision(
        &self,
        instance: &InstanceKey,
        _accepts_incomplete: bool,
    ) -> Result<OperationResponse, ServiceManagerError> {
        let mut state = self.lock();
        state.deprovisions.push(instance.clone());
        if let Some(err) = state.deprovision_failures.pop_front() {
            return Err(err);
        }
        Ok(OperationResponse {
            operation: Some(format!("deprovision-{}", instance.instance_id)),
        })
    }
}

/// Hands out one shared fake regardless of credentials
#[derive(Debug, Clone)]
pub struct FakeClientFactory {
    client: Arc<FakeServiceManager>,
    regions: Arc<Mutex<Vec<String>>>,
}

impl FakeClientFactory {
    pub fn new(client: Arc<FakeServiceManager>) -> Self {
        Self {
            client,
            regions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Regions clients were requested for, in order
    pub fn requested_regions(&self) -> Vec<String> {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ClientFactory for FakeClientFactory {
    fn for_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ServiceManagerClient>, ServiceManagerError> {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(credentials.region.clone());
        Ok(self.client.clone())
    }
}
