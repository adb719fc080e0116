//! Operation persistence
//!
//! Updates are compare-and-swap on `update_count`: a write only lands when
//! the caller saw the latest stored version. A lost race is reported as
//! [`UpdateOutcome::Conflict`], not as an error, so callers can re-read and
//! try again.

use async_trait::async_trait;
use kestrel_model::{Operation, OperationState};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("operation not found: {0}")]
    NotFound(Uuid),

    #[error("operation already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock error: {0}")]
    Lock(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of a compare-and-swap update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Write landed; carries the operation with its new `update_count`
    Updated(Operation),
    /// Stored version moved on since the caller read it
    Conflict { stored_count: u64 },
}

/// Durable operation storage
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Get an operation by ID
    async fn get_operation(&self, id: Uuid) -> StoreResult<Option<Operation>>;

    /// Store a new operation
    async fn insert_operation(&self, operation: &Operation) -> StoreResult<Operation>;

    /// Replace an operation if its `update_count` matches the stored one
    async fn update_operation(&self, operation: &Operation) -> StoreResult<UpdateOutcome>;

    /// List operations in the given state
    async fn list_operations_by_state(&self, state: OperationState) -> StoreResult<Vec<Operation>>;

    /// List operations that have not reached a terminal state
    async fn list_unfinished(&self) -> StoreResult<Vec<Operation>> {
        let mut pending = self.list_operations_by_state(OperationState::Pending).await?;
        pending.extend(self.list_operations_by_state(OperationState::InProgress).await?);
        Ok(pending)
    }
}

/// In-memory operation store
///
/// Operations are kept in their serialized form, so transient fields such
/// as computed overrides never survive a round trip through the store.
#[derive(Debug, Default)]
pub struct MemoryOperationStore {
    operations: RwLock<HashMap<Uuid, String>>,
}

impl MemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_lock(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, String>>> {
        self.operations
            .write()
            .map_err(|e| StoreError::Lock(format!("write lock poisoned: {}", e)))
    }

    fn read_lock(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, HashMap<Uuid, String>>> {
        self.operations
            .read()
            .map_err(|e| StoreError::Lock(format!("read lock poisoned: {}", e)))
    }

    fn encode(operation: &Operation) -> StoreResult<String> {
        serde_json::to_string(operation).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(raw: &str) -> StoreResult<Operation> {
        serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl OperationStore for MemoryOperationStore {
    async fn get_operation(&self, id: Uuid) -> StoreResult<Option<Operation>> {
        let operations = self.read_lock()?;
        operations.get(&id).map(|raw| Self::decode(raw)).transpose()
    }

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<Operation> {
        let mut operations = self.write_lock()?;
        if operations.contains_key(&operation.id) {
            return Err(StoreError::AlreadyExists(operation.id));
        }
        operations.insert(operation.id, Self::encode(operation)?);
        Ok(operation.clone())
    }

    async fn update_operation(&self, operation: &Operation) -> StoreResult<UpdateOutcome> {
        let mut operations = self.write_lock()?;
        let raw = operations
            .get(&operation.id)
            .ok_or(StoreError::NotFound(operation.id))?;

        let stored = Self::decode(raw)?;
        if stored.update_count != operation.update_count {
            return Ok(UpdateOutcome::Conflict {
                stored_count: stored.update_count,
            });
        }

        let mut updated = operation.clone();
        updated.update_count += 1;
        operations.insert(updated.id, Self::encode(&updated)?);
        Ok(UpdateOutcome::Updated(updated))
    }

    async fn list_operations_by_state(&self, state: OperationState) -> StoreResult<Vec<Operation>> {
        let operations = self.read_lock()?;
        let mut matching = Vec::new();
        for raw in operations.values() {
            let operation = Self::decode(raw)?;
            if operation.state == state {
                matching.push(operation);
            }
        }
        matching.sort_by_key(|op| op.created_at);
        Ok(matching)
    }
}
