//! CLS removal step

use super::ClsStepContext;
use crate::settings::RetryPolicy;
use crate::step::{Step, StepOutcome};
use async_trait::async_trait;
use kestrel_model::Operation;
use tracing::{debug, error, info};

const NAME: &str = "cls-deprovision";

/// Removes the CLS instance and forgets its binding
pub struct ClsDeprovisionStep {
    context: ClsStepContext,
    retry: RetryPolicy,
}

impl ClsDeprovisionStep {
    pub fn new(context: ClsStepContext, retry: RetryPolicy) -> Self {
        Self { context, retry }
    }
}

#[async_trait]
impl Step for ClsDeprovisionStep {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        let manager = &self.context.manager;
        if !operation.addon.provisioned {
            debug!(operation = %operation.id, "No CLS instance to remove");
            return StepOutcome::Continue(operation);
        }

        let sm = match self
            .context
            .service_manager(&operation.addon.instance_key.region)
        {
            Ok(sm) => sm,
            Err(reason) => return manager.operation_failed(operation, &reason).await,
        };

        if let Err(e) = self
            .context
            .client
            .remove_instance(sm.as_ref(), &operation.addon.instance_key)
            .await
        {
            let reason = format!("Unable to remove CLS instance: {}", e);
            if e.is_temporary() {
                error!(operation = %operation.id, error = %e, "Temporary error while removing CLS instance");
                return manager.retry_operation(operation, NAME, &reason, self.retry).await;
            }
            error!(operation = %operation.id, error = %e, "Failed to remove CLS instance");
            return manager.operation_failed(operation, &reason).await;
        }

        let (updated, retry) = manager
            .update_operation(operation, |op| {
                op.addon.provisioned = false;
                op.addon.binding_id = None;
                op.addon.encrypted_overrides = None;
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
            "CLS instance removed"
        );
        StepOutcome::Continue(updated)
    }
}
