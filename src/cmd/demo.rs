use chrono::Utc;
use clap::Args;
use color_eyre::eyre::{eyre, Result, WrapErr};
use kestrel_cls::servicemanager::{FakeClientFactory, FakeServiceManager};
use kestrel_cls::ClsClient;
use kestrel_model::{ComponentOverrides, InstanceKey, Operation};
use kestrel_workflow::{
    cls_provisioning_pipeline, ClsStepContext, MemoryOperationStore, OperationManager,
    PassOutcome, WorkflowSettings,
};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Path to the CLS configuration YAML
    #[arg(short, long)]
    pub config: PathBuf,

    /// Key used to encrypt binding credentials
    #[arg(long, env = "KESTREL_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Service Manager region of the instance
    #[arg(long, default_value = "eu")]
    pub region: String,

    /// Cluster software version
    #[arg(long, default_value = "1.20.0")]
    pub runtime_version: String,
}

fn overrides_json(overrides: &ComponentOverrides) -> Value {
    let mut components = Map::new();
    for component in overrides.components() {
        let entries: Map<String, Value> = overrides
            .for_component(component)
            .iter()
            .map(|entry| (entry.key.clone(), Value::String(entry.value.clone())))
            .collect();
        components.insert(component.to_string(), Value::Object(entries));
    }
    Value::Object(components)
}

pub async fn run(args: DemoArgs) -> Result<()> {
    let config = Arc::new(super::load_config(&args.config)?);
    let settings = WorkflowSettings::default();

    let store = Arc::new(MemoryOperationStore::new());
    let manager = Arc::new(OperationManager::new(store.clone()).with_settings(&settings));
    let service_manager = Arc::new(FakeServiceManager::new());
    let context = ClsStepContext::new(
        ClsClient::new(config),
        Arc::new(FakeClientFactory::new(service_manager)),
        manager.clone(),
    );
    let pipeline = cls_provisioning_pipeline(context, args.secret_key, &settings);

    let operation = Operation::new(
        Uuid::new_v4(),
        InstanceKey::new("cls-service", "cls-plan", "cls-broker", args.region),
        Utc::now(),
    )
    .with_runtime_version(args.runtime_version);
    operation.validate().wrap_err("Invalid demo operation")?;
    manager
        .store()
        .insert_operation(&operation)
        .await
        .wrap_err("Failed to store operation")?;
    info!(operation = %operation.id, "Running CLS provisioning demo");

    let outcome = pipeline
        .run_to_completion(operation.id)
        .await
        .wrap_err("Pipeline run failed")?;

    let operation = match outcome {
        PassOutcome::Succeeded(operation) => operation,
        PassOutcome::Failed { reason, .. } => return Err(eyre!("Operation failed: {}", reason)),
        PassOutcome::Rescheduled { .. } => return Err(eyre!("Operation did not finish")),
    };

    let output = json!({
        "operation": operation,
        "overrides": overrides_json(&operation.overrides),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
