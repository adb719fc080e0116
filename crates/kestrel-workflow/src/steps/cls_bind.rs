//! CLS binding step
//!
//! Creates a binding for the provisioned CLS instance and turns its
//! credentials into fluent-bit overrides. The binding ID is persisted before
//! the bind call and the encrypted credentials right after it, so a re-run
//! never creates a second binding and never calls the Service Manager once
//! the credentials are stored.

use super::ClsStepContext;
use crate::settings::RetryPolicy;
use crate::step::{Step, StepOutcome};
use async_trait::async_trait;
use kestrel_cls::{
    decrypt_overrides, encrypt_overrides, fluent_bit_overrides, get_extra_conf_template,
    is_version_at_least, render_overrides, BindingRequest, OverrideParams,
    CLS_OVERRIDES_MIN_VERSION, COMPONENT_NAME,
};
use kestrel_model::Operation;
use tracing::{debug, error, info};
use uuid::Uuid;

const NAME: &str = "cls-bind";

pub struct ClsBindStep {
    context: ClsStepContext,
    secret_key: String,
    retry: RetryPolicy,
}

impl ClsBindStep {
    pub fn new(context: ClsStepContext, secret_key: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            context,
            secret_key: secret_key.into(),
            retry,
        }
    }

    async fn fail(&self, operation: Operation, reason: String) -> StepOutcome {
        self.context.manager.operation_failed(operation, &reason).await
    }

    /// Obtain override parameters through a new or resumed binding
    async fn bind(&self, operation: Operation) -> Result<(Operation, OverrideParams), StepOutcome> {
        let manager = &self.context.manager;
        let region = operation.addon.instance_key.region.clone();

        let sm = match self.context.service_manager(&region) {
            Ok(sm) => sm,
            Err(reason) => return Err(self.fail(operation, reason).await),
        };

        let stored_id = operation
            .addon
            .binding_id
            .clone()
            .filter(|binding_id| !binding_id.is_empty());

        let (operation, binding_id) = match stored_id {
            Some(binding_id) => (operation, binding_id),
            None => {
                let binding_id = Uuid::new_v4().to_string();
                let generated = binding_id.clone();
                let (updated, retry) = manager
                    .update_operation(operation, |op| op.addon.binding_id = Some(generated))
                    .await;
                if !retry.is_zero() {
                    return Err(StepOutcome::Reschedule {
                        operation: updated,
                        after: retry,
                    });
                }
                (updated, binding_id)
            }
        };

        let request = BindingRequest {
            instance_key: operation.addon.instance_key.clone(),
            binding_id,
        };
        let params = match self.context.client.create_binding(sm.as_ref(), &request).await {
            Ok(params) => params,
            Err(e) if e.is_temporary() => {
                error!(operation = %operation.id, error = %e, "Temporary error while binding CLS instance");
                let reason = format!("Unable to create CLS binding: {}", e);
                return Err(self
                    .context
                    .manager
                    .retry_operation(operation, NAME, &reason, self.retry)
                    .await);
            }
            Err(e) => {
                error!(operation = %operation.id, error = %e, "Failed to bind CLS instance");
                return Err(self.fail(operation, format!("Unable to create CLS binding: {}", e)).await);
            }
        };

        let encrypted = match encrypt_overrides(&self.secret_key, &params) {
            Ok(encrypted) => encrypted,
            Err(e) => {
                return Err(self
                    .fail(operation, format!("Unable to encrypt CLS overrides: {}", e))
                    .await)
            }
        };

        let (updated, retry) = manager
            .update_operation(operation, |op| {
                op.addon.encrypted_overrides = Some(encrypted);
                op.clear_retry(NAME);
            })
            .await;
        if !retry.is_zero() {
            return Err(StepOutcome::Reschedule {
                operation: updated,
                after: retry,
            });
        }

        info!(
            operation = %updated.id,
            binding = request.binding_id.as_str(),
            "CLS instance bound"
        );
        Ok((updated, params))
    }
}

#[async_trait]
impl Step for ClsBindStep {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self, operation: Operation) -> StepOutcome {
        if !operation.addon.provisioned {
            return self
                .fail(operation, "CLS instance was not provisioned".to_string())
                .await;
        }

        let stored = operation
            .addon
            .encrypted_overrides
            .clone()
            .filter(|encrypted| !encrypted.is_empty());

        let (mut operation, params) = match stored {
            Some(encrypted) => {
                debug!(operation = %operation.id, "Reusing stored CLS binding");
                match decrypt_overrides(&self.secret_key, &encrypted) {
                    Ok(params) => (operation, params),
                    Err(e) => {
                        error!(operation = %operation.id, error = %e, "Failed to decrypt CLS overrides");
                        return self
                            .fail(operation, format!("Unable to decrypt CLS overrides: {}", e))
                            .await;
                    }
                }
            }
            None => match self.bind(operation).await {
                Ok(bound) => bound,
                Err(outcome) => return outcome,
            },
        };

        let rendered = match render_overrides(&params, get_extra_conf_template()) {
            Ok(rendered) => rendered,
            Err(e) => {
                return self
                    .fail(operation, format!("Unable to render CLS overrides: {}", e))
                    .await
            }
        };

        match is_version_at_least(&operation.runtime_version, CLS_OVERRIDES_MIN_VERSION) {
            Ok(true) => operation
                .overrides
                .append(COMPONENT_NAME, fluent_bit_overrides(rendered)),
            Ok(false) => debug!(
                operation = %operation.id,
                version = operation.runtime_version.as_str(),
                "Cluster version predates CLS overrides"
            ),
            Err(e) => {
                return self
                    .fail(operation, format!("Unable to check cluster version: {}", e))
                    .await
            }
        }

        StepOutcome::Continue(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::test_helpers::{fixture, fixture_with, Fixture, SECRET_KEY};
    use kestrel_cls::servicemanager::FakeServiceManager;
    use kestrel_cls::{ServiceManagerError, ADDITIONAL_OUTPUTS_KEY, FORWARD_ENABLED_KEY};
    use kestrel_model::OperationState;
    use std::time::Duration;

    fn step(f: &Fixture) -> ClsBindStep {
        ClsBindStep::new(
            f.context.clone(),
            SECRET_KEY,
            RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(30 * 60)),
        )
    }

    fn provisioned(op: &mut Operation) {
        op.addon.provisioned = true;
        op.addon.instance_key.instance_id = "inst-1".to_string();
    }

    fn temporary() -> ServiceManagerError {
        ServiceManagerError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_bind_fresh_operation() {
        let f = fixture();
        let op = f.insert(provisioned).await;

        let outcome = step(&f).run(op.clone()).await;
        let result = match outcome {
            StepOutcome::Continue(result) => result,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let stored = f.stored(op.id).await;
        let binding_id = stored.addon.binding_id.clone().unwrap();
        assert!(stored.addon.is_bound());
        assert_eq!(f.sm.bind_calls(), vec![(stored.addon.instance_key.clone(), binding_id.clone())]);
        assert_eq!(f.factory.requested_regions(), vec!["eu".to_string()]);

        // ciphertext only; plaintext lives in memory
        let encrypted = stored.addon.encrypted_overrides.clone().unwrap();
        assert!(!encrypted.contains(&format!("pass-{}", binding_id)));
        assert!(stored.overrides.is_empty());

        assert_eq!(result.overrides.get(COMPONENT_NAME, FORWARD_ENABLED_KEY), Some("false"));
        let additional = result
            .overrides
            .get(COMPONENT_NAME, ADDITIONAL_OUTPUTS_KEY)
            .unwrap();
        assert!(additional.contains(&format!("fluentd-{}.cls.example.com", binding_id)));
        assert!(additional.contains(&format!("pass-{}", binding_id)));
    }

    #[tokio::test]
    async fn test_rerun_uses_stored_binding() {
        let f = fixture();
        let op = f.insert(provisioned).await;
        let first = step(&f).run(op.clone()).await.into_operation();

        let reloaded = f.stored(op.id).await;
        let second = step(&f).run(reloaded.clone()).await;

        assert_eq!(f.sm.bind_calls().len(), 1);
        let second = second.into_operation();
        assert_eq!(second.update_count, reloaded.update_count);
        assert_eq!(first.overrides, second.overrides);
        assert_eq!(f.stored(op.id).await.addon.binding_id, reloaded.addon.binding_id);
    }

    #[tokio::test]
    async fn test_existing_binding_id_is_reused() {
        let f = fixture();
        let op = f
            .insert(|op| {
                provisioned(op);
                op.addon.binding_id = Some("binding-42".to_string());
            })
            .await;

        let outcome = step(&f).run(op.clone()).await;
        assert!(matches!(outcome, StepOutcome::Continue(_)));

        let calls = f.sm.bind_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "binding-42");
        assert_eq!(f.stored(op.id).await.addon.binding_id.as_deref(), Some("binding-42"));
    }

    #[tokio::test]
    async fn test_empty_binding_id_is_regenerated() {
        let f = fixture();
        let op = f
            .insert(|op| {
                provisioned(op);
                op.addon.binding_id = Some(String::new());
            })
            .await;

        let outcome = step(&f).run(op.clone()).await;
        assert!(matches!(outcome, StepOutcome::Continue(_)));

        let stored = f.stored(op.id).await;
        let binding_id = stored.addon.binding_id.clone().unwrap();
        assert!(!binding_id.is_empty());
        assert_eq!(f.sm.bind_calls(), vec![(stored.addon.instance_key.clone(), binding_id)]);
    }

    #[tokio::test]
    async fn test_not_provisioned_fails() {
        let f = fixture();
        let op = f.insert(|_| {}).await;

        match step(&f).run(op.clone()).await {
            StepOutcome::Failed { reason, .. } => {
                assert_eq!(reason, "CLS instance was not provisioned")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(f.sm.bind_calls().is_empty());
        assert_eq!(f.stored(op.id).await.state, OperationState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_region_fails() {
        let f = fixture();
        let op = f
            .insert(|op| {
                provisioned(op);
                op.addon.instance_key.region = "us".to_string();
            })
            .await;

        match step(&f).run(op.clone()).await {
            StepOutcome::Failed { reason, .. } => assert!(reason.contains("region us")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(f.sm.bind_calls().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_on_binding_id_reschedules() {
        let f = fixture();
        let stale = f.insert(provisioned).await;
        f.manager
            .update_operation(stale.clone(), |op| op.description = "touched".to_string())
            .await;

        let outcome = step(&f).run(stale.clone()).await;

        assert_eq!(outcome.delay(), Duration::from_secs(1));
        assert!(f.sm.bind_calls().is_empty());
        assert_eq!(f.stored(stale.id).await.addon.binding_id, None);
    }

    #[tokio::test]
    async fn test_missing_credential_field_fails() {
        let mut credentials = FakeServiceManager::default_bind_credentials("b");
        credentials.remove("Fluentd-endpoint");
        let f = fixture_with(FakeServiceManager::new().with_bind_credentials(credentials));
        let op = f.insert(provisioned).await;

        match step(&f).run(op.clone()).await {
            StepOutcome::Failed { reason, .. } => assert!(reason.contains("Fluentd-endpoint")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let stored = f.stored(op.id).await;
        assert_eq!(stored.state, OperationState::Failed);
        assert!(!stored.addon.is_bound());
    }

    #[tokio::test]
    async fn test_temporary_error_retries_until_deadline() {
        let f = fixture();
        let op = f.insert(provisioned).await;
        let step = step(&f);

        f.sm.fail_next_bind(temporary());
        let outcome = step.run(op.clone()).await;
        assert_eq!(outcome.delay(), Duration::from_secs(10));
        let stored = f.stored(op.id).await;
        assert_eq!(stored.state, OperationState::Pending);
        let binding_id = stored.addon.binding_id.clone();
        assert!(binding_id.is_some());

        f.clock.advance(Duration::from_secs(31 * 60));
        f.sm.fail_next_bind(temporary());
        let outcome = step.run(stored).await;
        assert!(outcome.is_failed());

        let calls = f.sm.bind_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(Some(calls[1].1.clone()), binding_id);
        assert_eq!(f.stored(op.id).await.state, OperationState::Failed);
    }

    #[tokio::test]
    async fn test_retry_budget_starts_at_first_bind_failure() {
        let f = fixture();
        let op = f.insert(provisioned).await;
        let step = step(&f);

        // provisioning took longer than the whole bind budget
        f.clock.advance(Duration::from_secs(31 * 60));
        f.sm.fail_next_bind(temporary());
        let outcome = step.run(op.clone()).await;
        assert_eq!(outcome.delay(), Duration::from_secs(10));
        let stored = f.stored(op.id).await;
        assert_eq!(stored.retrying_since(NAME), Some(f.clock.now()));

        f.clock.advance(Duration::from_secs(10));
        let outcome = step.run(stored).await;
        assert!(matches!(outcome, StepOutcome::Continue(_)));

        let stored = f.stored(op.id).await;
        assert!(stored.addon.is_bound());
        assert_eq!(stored.retrying_since(NAME), None);
        assert_eq!(f.sm.bind_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_fails() {
        let f = fixture();
        let op = f.insert(provisioned).await;
        f.sm.fail_next_bind(ServiceManagerError::Status {
            status: 400,
            message: "bad request".to_string(),
        });

        let outcome = step(&f).run(op.clone()).await;
        assert!(outcome.is_failed());
        assert_eq!(f.sm.bind_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_ciphertext_fails() {
        let f = fixture();
        let op = f
            .insert(|op| {
                provisioned(op);
                op.addon.binding_id = Some("b".to_string());
                op.addon.encrypted_overrides = Some("bm90IGEgY2lwaGVydGV4dA==".to_string());
            })
            .await;

        match step(&f).run(op.clone()).await {
            StepOutcome::Failed { reason, .. } => assert!(reason.contains("decrypt")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(f.sm.bind_calls().is_empty());
    }

    #[tokio::test]
    async fn test_old_cluster_gets_no_overrides() {
        let f = fixture();
        let op = f
            .insert(|op| {
                provisioned(op);
                op.runtime_version = "1.19.4".to_string();
            })
            .await;

        let outcome = step(&f).run(op.clone()).await;
        let result = match outcome {
            StepOutcome::Continue(result) => result,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert!(result.overrides.is_empty());
        assert!(f.stored(op.id).await.addon.is_bound());
    }

    #[tokio::test]
    async fn test_development_build_gets_overrides() {
        let f = fixture();
        let op = f
            .insert(|op| {
                provisioned(op);
                op.runtime_version = "PR-1234".to_string();
            })
            .await;

        let result = step(&f).run(op).await.into_operation();
        assert!(result.overrides.get(COMPONENT_NAME, FORWARD_ENABLED_KEY).is_some());
    }

    #[tokio::test]
    async fn test_unparseable_version_fails() {
        let f = fixture();
        let op = f
            .insert(|op| {
                provisioned(op);
                op.runtime_version = "latest".to_string();
            })
            .await;

        match step(&f).run(op).await {
            StepOutcome::Failed { reason, .. } => assert!(reason.contains("cluster version")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
