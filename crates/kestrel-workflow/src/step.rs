//! Step contract
//!
//! A step is one idempotent unit of work in a pipeline. It receives the
//! latest operation and reports how the pipeline should proceed. Every
//! resumable fact a step produces must be persisted on the operation before
//! the step depends on it.

use async_trait::async_trait;
use kestrel_model::Operation;
use std::time::Duration;

/// How a pipeline proceeds after a step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Step finished; move to the next one
    Continue(Operation),
    /// Run this step again after the delay
    Reschedule { operation: Operation, after: Duration },
    /// Permanent failure; the operation is already marked failed
    Failed { operation: Operation, reason: String },
}

impl StepOutcome {
    pub fn operation(&self) -> &Operation {
        match self {
            StepOutcome::Continue(operation)
            | StepOutcome::Reschedule { operation, .. }
            | StepOutcome::Failed { operation, .. } => operation,
        }
    }

    pub fn into_operation(self) -> Operation {
        match self {
            StepOutcome::Continue(operation)
            | StepOutcome::Reschedule { operation, .. }
            | StepOutcome::Failed { operation, .. } => operation,
        }
    }

    /// Delay before the next attempt, zero unless rescheduled
    pub fn delay(&self) -> Duration {
        match self {
            StepOutcome::Reschedule { after, .. } => *after,
            _ => Duration::ZERO,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

/// One unit of work in a pipeline
#[async_trait]
pub trait Step: Send + Sync {
    /// Step name for logging
    fn name(&self) -> &str;

    /// Run the step against the latest operation
    async fn run(&self, operation: Operation) -> StepOutcome;
}
