//! Shared fixtures for step tests

use crate::clock::{Clock, ManualClock};
use crate::manager::OperationManager;
use crate::steps::ClsStepContext;
use crate::store::{
    MemoryOperationStore, OperationStore, StoreError, StoreResult, UpdateOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use kestrel_cls::servicemanager::{FakeClientFactory, FakeServiceManager};
use kestrel_cls::{ClsClient, Config, Credentials, SamlConfig, ServiceManagerConfig};
use kestrel_model::{InstanceKey, Operation, OperationState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const SECRET_KEY: &str = "test-secret-key";

/// Memory store that fails a scripted number of calls
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<MemoryOperationStore>,
    failing_reads: AtomicUsize,
    failing_success_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryOperationStore>) -> Self {
        Self {
            inner,
            failing_reads: AtomicUsize::new(0),
            failing_success_writes: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` reads
    pub fn fail_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` writes that mark an operation succeeded
    pub fn fail_success_writes(&self, count: usize) {
        self.failing_success_writes.store(count, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OperationStore for FlakyStore {
    async fn get_operation(&self, id: Uuid) -> StoreResult<Option<Operation>> {
        if Self::take(&self.failing_reads) {
            return Err(StoreError::Lock("read failed".to_string()));
        }
        self.inner.get_operation(id).await
    }

    async fn insert_operation(&self, operation: &Operation) -> StoreResult<Operation> {
        self.inner.insert_operation(operation).await
    }

    async fn update_operation(&self, operation: &Operation) -> StoreResult<UpdateOutcome> {
        if operation.state == OperationState::Succeeded
            && Self::take(&self.failing_success_writes)
        {
            return Err(StoreError::Lock("write failed".to_string()));
        }
        self.inner.update_operation(operation).await
    }

    async fn list_operations_by_state(&self, state: OperationState) -> StoreResult<Vec<Operation>> {
        self.inner.list_operations_by_state(state).await
    }
}

pub struct Fixture {
    /// Backing store, read directly by assertions
    pub store: Arc<MemoryOperationStore>,
    /// Store seen by the manager
    pub flaky: Arc<FlakyStore>,
    pub clock: Arc<ManualClock>,
    pub manager: Arc<OperationManager>,
    pub sm: Arc<FakeServiceManager>,
    pub factory: Arc<FakeClientFactory>,
    pub context: ClsStepContext,
}

pub fn config() -> Config {
    Config {
        retention_period: 7,
        max_data_instances: 2,
        max_ingest_instances: 2,
        saml: SamlConfig {
            admin_group: "runtimeAdmin".to_string(),
            exchange_key: "exchange".to_string(),
            roles_key: "groups".to_string(),
            ..Default::default()
        },
        service_manager: ServiceManagerConfig {
            credentials: vec![Credentials::new(
                "eu",
                "https://sm.eu.example.com",
                "user",
                "pass",
            )],
        },
    }
}

pub fn fixture() -> Fixture {
    fixture_with(FakeServiceManager::new())
}

pub fn fixture_with(sm: FakeServiceManager) -> Fixture {
    let store = Arc::new(MemoryOperationStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let manager = Arc::new(OperationManager::new(flaky.clone()).with_clock(clock.clone()));
    let sm = Arc::new(sm);
    let factory = Arc::new(FakeClientFactory::new(sm.clone()));
    let context = ClsStepContext::new(
        ClsClient::new(Arc::new(config())),
        factory.clone(),
        manager.clone(),
    );
    Fixture {
        store,
        flaky,
        clock,
        manager,
        sm,
        factory,
        context,
    }
}

impl Fixture {
    /// Store a fresh operation for an EU instance
    pub async fn insert(&self, configure: impl FnOnce(&mut Operation)) -> Operation {
        let mut op = Operation::new(
            Uuid::new_v4(),
            InstanceKey::new("svc-cls", "plan-cls", "broker-1", "eu"),
            self.clock.now(),
        )
        .with_runtime_version("1.20.0");
        configure(&mut op);
        self.store.insert_operation(&op).await.unwrap()
    }

    pub async fn stored(&self, id: Uuid) -> Operation {
        self.store.get_operation(id).await.unwrap().unwrap()
    }
}
