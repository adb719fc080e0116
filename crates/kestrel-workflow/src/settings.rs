//! Engine tuning knobs

use crate::error::{Result, WorkflowError};
use std::time::Duration;

/// Interval between attempts and the overall budget, measured from the
/// operation's creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Settings shared by the operation manager, steps and workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Number of concurrent workers
    pub workers: usize,
    /// Delay before re-running a step that lost an update race
    pub conflict_retry_delay: Duration,
    /// Delay before re-running a step after a store failure
    pub store_error_retry_delay: Duration,
    /// Retry budget for CLS binding
    pub bind_retry: RetryPolicy,
    /// Retry budget for CLS provisioning and removal
    pub provision_retry: RetryPolicy,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            conflict_retry_delay: Duration::from_secs(1),
            store_error_retry_delay: Duration::from_secs(60),
            bind_retry: RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(30 * 60)),
            provision_retry: RetryPolicy::new(
                Duration::from_secs(10),
                Duration::from_secs(30 * 60),
            ),
        }
    }
}

impl WorkflowSettings {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(WorkflowError::InvalidConfiguration(
                "at least one worker is required".to_string(),
            ));
        }
        if self.conflict_retry_delay.is_zero() || self.store_error_retry_delay.is_zero() {
            return Err(WorkflowError::InvalidConfiguration(
                "retry delays must be positive".to_string(),
            ));
        }
        for (name, policy) in [("bind", self.bind_retry), ("provision", self.provision_retry)] {
            if policy.interval.is_zero() {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "{} retry interval must be positive",
                    name
                )));
            }
        }
        Ok(())
    }
}
