//! Operation record types
//!
//! An `Operation` is owned by the operation store between steps. Workers get
//! a copy, mutate it through the operation manager, and every successful
//! write bumps `update_count`.

use crate::{ComponentOverrides, ModelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Persisted record of one add-on provisioning workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Immutable operation identifier
    pub id: Uuid,

    /// Write counter used for optimistic concurrency
    pub update_count: u64,

    /// Lifecycle state
    pub state: OperationState,

    /// Human-readable status or failure reason
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Time of the last successful write
    pub updated_at: DateTime<Utc>,

    /// Version of the cluster software the add-on is attached to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub runtime_version: String,

    /// Managed add-on state
    pub addon: AddOnState,

    /// First temporary failure of each step still being retried, keyed by
    /// step name. Retry deadlines are measured from here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retrying_since: BTreeMap<String, DateTime<Utc>>,

    /// Outgoing cluster configuration assembled by steps.
    /// Never persisted: it may carry plaintext secrets.
    #[serde(skip)]
    pub overrides: ComponentOverrides,
}

impl Operation {
    /// Create a pending operation for the given instance
    pub fn new(id: Uuid, instance: InstanceKey, now: DateTime<Utc>) -> Self {
        Self {
            id,
            update_count: 0,
            state: OperationState::Pending,
            description: String::new(),
            created_at: now,
            updated_at: now,
            runtime_version: String::new(),
            addon: AddOnState::new(instance),
            retrying_since: BTreeMap::new(),
            overrides: ComponentOverrides::default(),
        }
    }

    /// Set the cluster software version
    pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.runtime_version = version.into();
        self
    }

    /// True once the operation reached Succeeded or Failed
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// When `step` first failed temporarily, if it is still retrying
    pub fn retrying_since(&self, step: &str) -> Option<DateTime<Utc>> {
        self.retrying_since.get(step).copied()
    }

    /// Forget the retry bookkeeping of `step`
    pub fn clear_retry(&mut self, step: &str) {
        self.retrying_since.remove(step);
    }

    /// Validate fields that must be present before any step runs
    pub fn validate(&self) -> Result<()> {
        self.addon.instance_key.validate()
    }
}

/// Operation lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::InProgress => "in_progress",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Succeeded | OperationState::Failed)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Add-on instance state carried by an operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AddOnState {
    /// Identity of the instance at the Service Manager
    pub instance_key: InstanceKey,

    /// Set once instance creation is confirmed
    #[serde(default)]
    pub provisioned: bool,

    /// Generated once and reused so binding creation stays idempotent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_id: Option<String>,

    /// Ciphertext of the binding secrets, written once per binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_overrides: Option<String>,
}

impl AddOnState {
    pub fn new(instance: InstanceKey) -> Self {
        Self {
            instance_key: instance,
            provisioned: false,
            binding_id: None,
            encrypted_overrides: None,
        }
    }

    /// Binding secrets already stored
    pub fn is_bound(&self) -> bool {
        self.encrypted_overrides
            .as_deref()
            .map(|o| !o.is_empty())
            .unwrap_or(false)
    }
}

/// Identifies a managed instance at the Service Manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKey {
    /// Instance identifier; empty until the provisioning step assigns one
    #[serde(default)]
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub broker_id: String,
    pub region: String,
}

impl InstanceKey {
    pub fn new(
        service_id: impl Into<String>,
        plan_id: impl Into<String>,
        broker_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: String::new(),
            service_id: service_id.into(),
            plan_id: plan_id.into(),
            broker_id: broker_id.into(),
            region: region.into(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Service, plan, broker and region must be set
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("instanceKey.serviceId", &self.service_id),
            ("instanceKey.planId", &self.plan_id),
            ("instanceKey.brokerId", &self.broker_id),
            ("instanceKey.region", &self.region),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(ModelError::MissingField(field.to_string()));
            }
        }
        Ok(())
    }
}
