//! Step pipeline
//!
//! Runs an operation through an ordered list of steps. Every pass starts at
//! the first step: steps whose results are already persisted pass straight
//! through, and transient output such as overrides is rebuilt on the way.
//! A pass stops at the first step that reschedules or fails. The operation is
//! marked in progress before the first step and succeeded after the last one.

use crate::error::{Result, WorkflowError};
use crate::manager::OperationManager;
use crate::step::{Step, StepOutcome};
use kestrel_model::{Operation, OperationState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Description recorded on successful operations
pub const SUCCEEDED_DESCRIPTION: &str = "Operation succeeded";

/// Result of one pipeline pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// All steps finished; the operation is succeeded
    Succeeded(Operation),
    /// A step failed permanently, or the operation had already failed
    Failed { operation: Operation, reason: String },
    /// Run another pass after the delay. `step` is the index of the step
    /// that asked for it, or the step count when the final write was deferred.
    Rescheduled {
        operation: Operation,
        step: usize,
        after: Duration,
    },
}

impl PassOutcome {
    pub fn operation(&self) -> &Operation {
        match self {
            PassOutcome::Succeeded(operation)
            | PassOutcome::Failed { operation, .. }
            | PassOutcome::Rescheduled { operation, .. } => operation,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PassOutcome::Rescheduled { .. })
    }
}

/// Ordered steps sharing one operation manager
pub struct StepPipeline {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    manager: Arc<OperationManager>,
}

impl StepPipeline {
    pub fn new(name: impl Into<String>, manager: Arc<OperationManager>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            manager,
        }
    }

    /// Append a step
    pub fn with_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn manager(&self) -> &Arc<OperationManager> {
        &self.manager
    }

    /// Run one pass for the stored operation
    pub async fn run(&self, id: Uuid) -> Result<PassOutcome> {
        let operation = self
            .manager
            .store()
            .get_operation(id)
            .await?
            .ok_or(WorkflowError::NotFound(id))?;

        match operation.state {
            OperationState::Succeeded => return Ok(PassOutcome::Succeeded(operation)),
            OperationState::Failed => {
                let reason = operation.description.clone();
                return Ok(PassOutcome::Failed { operation, reason });
            }
            _ => {}
        }

        let mut operation = operation;
        if let Err(e) = operation.validate() {
            let reason = format!("Invalid operation: {}", e);
            return Ok(self.finish(0, self.manager.operation_failed(operation, &reason).await));
        }

        if operation.state == OperationState::Pending {
            let (updated, retry) = self
                .manager
                .update_operation(operation, |op| op.state = OperationState::InProgress)
                .await;
            if !retry.is_zero() {
                return Ok(PassOutcome::Rescheduled {
                    operation: updated,
                    step: 0,
                    after: retry,
                });
            }
            info!(pipeline = %self.name, operation = %id, "Operation started");
            operation = updated;
        }

        for (index, step) in self.steps.iter().enumerate() {
            debug!(pipeline = %self.name, operation = %id, step = step.name(), "Running step");
            match step.run(operation).await {
                StepOutcome::Continue(next) => operation = next,
                outcome => return Ok(self.finish(index, outcome)),
            }
        }

        let (operation, retry) = self
            .manager
            .update_operation(operation, |op| {
                op.state = OperationState::Succeeded;
                op.description = SUCCEEDED_DESCRIPTION.to_string();
                op.retrying_since.clear();
            })
            .await;
        if !retry.is_zero() {
            return Ok(PassOutcome::Rescheduled {
                operation,
                step: self.steps.len(),
                after: retry,
            });
        }

        info!(pipeline = %self.name, operation = %id, "Operation succeeded");
        Ok(PassOutcome::Succeeded(operation))
    }

    fn finish(&self, step: usize, outcome: StepOutcome) -> PassOutcome {
        match outcome {
            StepOutcome::Continue(operation) => PassOutcome::Rescheduled {
                operation,
                step,
                after: Duration::ZERO,
            },
            StepOutcome::Reschedule { operation, after } => {
                debug!(
                    pipeline = %self.name,
                    operation = %operation.id,
                    step,
                    after = ?after,
                    "Step rescheduled"
                );
                PassOutcome::Rescheduled {
                    operation,
                    step,
                    after,
                }
            }
            StepOutcome::Failed { operation, reason } => {
                warn!(
                    pipeline = %self.name,
                    operation = %operation.id,
                    step,
                    reason = %reason,
                    "Step failed"
                );
                PassOutcome::Failed { operation, reason }
            }
        }
    }

    /// Run passes back to back, sleeping through reschedules, until the
    /// operation reaches a terminal state
    pub async fn run_to_completion(&self, id: Uuid) -> Result<PassOutcome> {
        loop {
            match self.run(id).await? {
                PassOutcome::Rescheduled { after, .. } => tokio::time::sleep(after).await,
                terminal => return Ok(terminal),
            }
        }
    }
}

impl std::fmt::Debug for StepPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepPipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}
