//! CLS add-on steps
//!
//! - `ClsProvisionStep`: create the CLS instance for the cluster
//! - `ClsBindStep`: bind it and compute fluent-bit overrides
//! - `ClsDeprovisionStep`: remove the instance

mod cls_bind;
mod cls_deprovision;
mod cls_provision;

pub use cls_bind::ClsBindStep;
pub use cls_deprovision::ClsDeprovisionStep;
pub use cls_provision::ClsProvisionStep;

use crate::manager::OperationManager;
use crate::pipeline::StepPipeline;
use crate::settings::WorkflowSettings;
use kestrel_cls::{find_credentials, ClientFactory, ClsClient, ServiceManagerClient};
use std::sync::Arc;
use tracing::error;

/// Collaborators shared by the CLS steps
#[derive(Clone)]
pub struct ClsStepContext {
    pub client: ClsClient,
    pub factory: Arc<dyn ClientFactory>,
    pub manager: Arc<OperationManager>,
}

impl ClsStepContext {
    pub fn new(
        client: ClsClient,
        factory: Arc<dyn ClientFactory>,
        manager: Arc<OperationManager>,
    ) -> Self {
        Self {
            client,
            factory,
            manager,
        }
    }

    /// Resolve the Service Manager client for a region
    ///
    /// The error is a failure reason suitable for the operation description.
    pub(crate) fn service_manager(
        &self,
        region: &str,
    ) -> std::result::Result<Arc<dyn ServiceManagerClient>, String> {
        let credentials = find_credentials(&self.client.config().service_manager, region)
            .map_err(|e| {
                error!(region, error = %e, "No Service Manager credentials");
                format!(
                    "Unable to find credentials for CLS Service Manager in region {}",
                    region
                )
            })?;

        self.factory.for_credentials(credentials).map_err(|e| {
            error!(region, error = %e, "Failed to create Service Manager client");
            format!("Unable to create Service Manager client: {}", e)
        })
    }
}

impl std::fmt::Debug for ClsStepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClsStepContext")
            .field("client", &self.client)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

/// Provision then bind CLS for a cluster
pub fn cls_provisioning_pipeline(
    context: ClsStepContext,
    secret_key: impl Into<String>,
    settings: &WorkflowSettings,
) -> StepPipeline {
    StepPipeline::new("cls-provisioning", context.manager.clone())
        .with_step(Arc::new(ClsProvisionStep::new(
            context.clone(),
            settings.provision_retry,
        )))
        .with_step(Arc::new(ClsBindStep::new(
            context,
            secret_key,
            settings.bind_retry,
        )))
}

/// Remove CLS from a cluster
pub fn cls_deprovisioning_pipeline(
    context: ClsStepContext,
    settings: &WorkflowSettings,
) -> StepPipeline {
    StepPipeline::new("cls-deprovisioning", context.manager.clone()).with_step(Arc::new(
        ClsDeprovisionStep::new(context, settings.provision_retry),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PassOutcome;
    use crate::store::OperationStore;
    use crate::test_helpers::{fixture, SECRET_KEY};
    use kestrel_cls::{ServiceManagerError, ADDITIONAL_OUTPUTS_KEY, COMPONENT_NAME};
    use kestrel_model::OperationState;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_provision_and_bind_end_to_end() {
        let f = fixture();
        let pipeline =
            cls_provisioning_pipeline(f.context.clone(), SECRET_KEY, &WorkflowSettings::default());
        let op = f.insert(|_| {}).await;
        f.sm.fail_next_bind(ServiceManagerError::Temporary("busy".to_string()));

        let outcome = pipeline.run_to_completion(op.id).await.unwrap();

        let result = match outcome {
            PassOutcome::Succeeded(result) => result,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(result
            .overrides
            .get(COMPONENT_NAME, ADDITIONAL_OUTPUTS_KEY)
            .is_some());

        let stored = f.stored(op.id).await;
        assert_eq!(stored.state, OperationState::Succeeded);
        assert!(stored.addon.provisioned);
        assert!(stored.addon.is_bound());
        assert_eq!(f.sm.provision_calls().len(), 1);
        assert_eq!(f.sm.bind_calls().len(), 2);
        assert_eq!(pipeline.step_names(), vec!["cls-provision", "cls-bind"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrides_survive_deferred_success_write() {
        let f = fixture();
        let pipeline =
            cls_provisioning_pipeline(f.context.clone(), SECRET_KEY, &WorkflowSettings::default());
        let op = f.insert(|_| {}).await;
        f.flaky.fail_success_writes(1);

        match pipeline.run(op.id).await.unwrap() {
            PassOutcome::Rescheduled { step, after, .. } => {
                assert_eq!(step, pipeline.len());
                assert_eq!(after, Duration::from_secs(60));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let outcome = pipeline.run_to_completion(op.id).await.unwrap();
        let result = match outcome {
            PassOutcome::Succeeded(result) => result,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(result
            .overrides
            .get(COMPONENT_NAME, ADDITIONAL_OUTPUTS_KEY)
            .is_some());
        assert_eq!(f.sm.provision_calls().len(), 1);
        assert_eq!(f.sm.bind_calls().len(), 1);
        assert_eq!(f.stored(op.id).await.state, OperationState::Succeeded);
    }

    #[tokio::test]
    async fn test_restart_after_partial_progress() {
        let f = fixture();
        let settings = WorkflowSettings::default();
        let pipeline = cls_provisioning_pipeline(f.context.clone(), SECRET_KEY, &settings);
        let op = f
            .insert(|op| {
                op.state = OperationState::InProgress;
                op.addon.provisioned = true;
                op.addon.instance_key.instance_id = "inst-1".to_string();
                op.addon.binding_id = Some("binding-before-crash".to_string());
            })
            .await;

        // a fresh process starts over at the first step
        let outcome = pipeline.run(op.id).await.unwrap();

        assert!(matches!(outcome, PassOutcome::Succeeded(_)));
        assert!(f.sm.provision_calls().is_empty());
        let binds = f.sm.bind_calls();
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].1, "binding-before-crash");
    }

    #[tokio::test]
    async fn test_deprovisioning_pipeline() {
        let f = fixture();
        let pipeline = cls_deprovisioning_pipeline(f.context.clone(), &WorkflowSettings::default());
        let op = f
            .insert(|op| {
                op.addon.provisioned = true;
                op.addon.instance_key.instance_id = "inst-1".to_string();
            })
            .await;

        let outcome = pipeline.run(op.id).await.unwrap();
        assert!(matches!(outcome, PassOutcome::Succeeded(_)));
        let stored = f.store.get_operation(op.id).await.unwrap().unwrap();
        assert!(!stored.addon.provisioned);
        assert_eq!(f.sm.deprovision_calls().len(), 1);
        assert!(stored.update_count >= 2);
    }
}
