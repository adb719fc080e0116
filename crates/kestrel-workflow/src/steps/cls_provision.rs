//! CLS provisioning step

use super::ClsStepContext;
use crate::settings::RetryPolicy;
use crate::step::{Step, StepOutcome};
use async_trait::async_trait;
use kestrel_model::Operation;
use tracing::{debug, error, info};
use uuid::Uuid;

const NAME: &str = "cls-provision";

/// Creates the CLS instance backing the add-on
///
/// The instance ID is persisted before the Service Manager call, so a re-run
/// repeats the request for the same instance instead of creating another.
pub struct ClsProvisionStep {
    context: ClsStepContext,
    retry: RetryPolicy,
}

impl ClsProvisionStep {
    pub fn new(context: ClsStepContext, retry: RetryPolicy) -> Self {
        Self { context, retry }
    }
}

#[async_trait]
impl Step for ClsProvisionStep {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        let manager = &self.context.manager;
        if operation.addon.provisioned {
            debug!(operation = %operation.id, "CLS instance already provisioned");
            return StepOutcome::Continue(operation);
        }

        let sm = match self
            .context
            .service_manager(&operation.addon.instance_key.region)
        {
            Ok(sm) => sm,
            Err(reason) => return manager.operation_failed(operation, &reason).await,
        };

        let mut operation = operation;
        if operation.addon.instance_key.instance_id.is_empty() {
            let instance_id = Uuid::new_v4().to_string();
            let (updated, retry) = manager
                .update_operation(operation, |op| op.addon.instance_key.instance_id = instance_id)
                .await;
            if !retry.is_zero() {
                return StepOutcome::Reschedule {
                    operation: updated,
                    after: retry,
                };
            }
            operation = updated;
        }

        if let Err(e) = self
            .context
            .client
            .create_instance(sm.as_ref(), &operation.addon.instance_key)
            .await
        {
            let reason = format!("Unable to provision CLS instance: {}", e);
            if e.is_temporary() {
                error!(operation = %operation.id, error = %e, "Temporary error while provisioning CLS instance");
                return manager.retry_operation(operation, NAME, &reason, self.retry).await;
            }
            error!(operation = %operation.id, error = %e, "Failed to provision CLS instance");
            return manager.operation_failed(operation, &reason).await;
        }

        let (updated, retry) = manager
            .update_operation(operation, |op| {
                op.addon.provisioned = true;
                op.clear_retry(NAME);
            })
            .await;
        if !retry.is_zero() {
            return StepOutcome::Reschedule {
                operation: updated,
                after: retry,
            };
        }

        info!(
            operation = %updated.id,
            instance = updated.addon.instance_key.instance_id.as_str(),
            "CLS instance provisioned"
        );
        StepOutcome::Continue(updated)
    }
}
