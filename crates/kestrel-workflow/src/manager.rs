//! Operation manager
//!
//! The single write path for operations. Steps mutate an operation only
//! through [`OperationManager::update_operation`], which applies the change
//! with a compare-and-swap and turns races and store failures into a retry
//! delay.

use crate::clock::{Clock, SystemClock};
use crate::settings::{RetryPolicy, WorkflowSettings};
use crate::step::StepOutcome;
use crate::store::{OperationStore, UpdateOutcome};
use kestrel_model::{Operation, OperationState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Persists operation changes and applies retry bookkeeping
#[derive(Clone)]
pub struct OperationManager {
    store: Arc<dyn OperationStore>,
    clock: Arc<dyn Clock>,
    conflict_retry_delay: Duration,
    store_error_retry_delay: Duration,
}

impl std::fmt::Debug for OperationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationManager")
            .field("clock", &self.clock)
            .field("conflict_retry_delay", &self.conflict_retry_delay)
            .field("store_error_retry_delay", &self.store_error_retry_delay)
            .finish_non_exhaustive()
    }
}

impl OperationManager {
    /// Create a manager with default settings and the system clock
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        let settings = WorkflowSettings::default();
        Self {
            store,
            clock: Arc::new(SystemClock),
            conflict_retry_delay: settings.conflict_retry_delay,
            store_error_retry_delay: settings.store_error_retry_delay,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: &WorkflowSettings) -> Self {
        self.conflict_retry_delay = settings.conflict_retry_delay;
        self.store_error_retry_delay = settings.store_error_retry_delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Delay before retrying after the store failed
    pub fn store_error_retry_delay(&self) -> Duration {
        self.store_error_retry_delay
    }

    /// Apply `mutate` and persist the result
    ///
    /// Returns the persisted operation and a zero delay on success. When the
    /// write loses a race or the store fails, the unchanged input operation
    /// is returned with the delay after which the caller should retry.
    /// Transient fields of the input survive the write.
    pub async fn update_operation<F>(&self, operation: Operation, mutate: F) -> (Operation, Duration)
    where
        F: FnOnce(&mut Operation) + Send,
    {
        let mut updated = operation.clone();
        mutate(&mut updated);
        updated.updated_at = self.clock.now();

        match self.store.update_operation(&updated).await {
            Ok(UpdateOutcome::Updated(persisted)) => (persisted, Duration::ZERO),
            Ok(UpdateOutcome::Conflict { stored_count }) => {
                warn!(
                    operation = %operation.id,
                    expected = operation.update_count,
                    stored = stored_count,
                    "Operation was updated concurrently"
                );
                (operation, self.conflict_retry_delay)
            }
            Err(e) => {
                error!(operation = %operation.id, error = %e, "Failed to update operation");
                (operation, self.store_error_retry_delay)
            }
        }
    }

    /// Reschedule after a temporary failure of `step`, or fail once the
    /// budget is spent
    ///
    /// The budget is measured from the step's first temporary failure. That
    /// time is persisted with the operation, so it holds across restarts; the
    /// step clears it once it gets through.
    pub async fn retry_operation(
        &self,
        operation: Operation,
        step: &str,
        reason: &str,
        policy: RetryPolicy,
    ) -> StepOutcome {
        let now = self.clock.now();
        let (operation, since) = match operation.retrying_since(step) {
            Some(since) => (operation, since),
            None => {
                let key = step.to_string();
                let (updated, retry) = self
                    .update_operation(operation, |op| {
                        op.retrying_since.insert(key, now);
                    })
                    .await;
                if !retry.is_zero() {
                    return StepOutcome::Reschedule {
                        operation: updated,
                        after: retry,
                    };
                }
                (updated, now)
            }
        };

        let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
        if elapsed > policy.timeout {
            error!(
                operation = %operation.id,
                step,
                elapsed = ?elapsed,
                timeout = ?policy.timeout,
                reason,
                "Giving up on operation"
            );
            return self.operation_failed(operation, reason).await;
        }

        warn!(
            operation = %operation.id,
            step,
            after = ?policy.interval,
            reason,
            "Retrying operation"
        );
        StepOutcome::Reschedule {
            operation,
            after: policy.interval,
        }
    }

    /// Mark the operation failed with `reason`
    ///
    /// If the failure cannot be persisted the step is rescheduled, so a
    /// later attempt observes the latest stored state.
    pub async fn operation_failed(&self, operation: Operation, reason: &str) -> StepOutcome {
        let description = reason.to_string();
        let (operation, retry) = self
            .update_operation(operation, |op| {
                op.state = OperationState::Failed;
                op.description = description;
            })
            .await;

        if !retry.is_zero() {
            return StepOutcome::Reschedule {
                operation,
                after: retry,
            };
        }

        info!(operation = %operation.id, reason, "Operation failed");
        StepOutcome::Failed {
            operation,
            reason: reason.to_string(),
        }
    }
}
