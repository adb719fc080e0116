//! Worker pool
//!
//! Workers take operations from the [`WorkQueue`], run one pipeline pass each
//! and put rescheduled operations back with their delay. A pass that hit a
//! store error is retried after the store error delay.

use crate::error::Result;
use crate::pipeline::{PassOutcome, StepPipeline};
use crate::queue::WorkQueue;
use kestrel_model::Operation;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pipeline plus the queue feeding it
#[derive(Debug, Clone)]
pub struct WorkerPool {
    pipeline: Arc<StepPipeline>,
    queue: Arc<WorkQueue>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<StepPipeline>) -> Self {
        Self {
            pipeline,
            queue: Arc::new(WorkQueue::new()),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn pipeline(&self) -> &Arc<StepPipeline> {
        &self.pipeline
    }

    /// Store a new operation and queue it
    pub async fn submit(&self, operation: Operation) -> Result<Uuid> {
        operation.validate()?;
        let stored = self
            .pipeline
            .manager()
            .store()
            .insert_operation(&operation)
            .await?;
        self.queue.add(stored.id);
        info!(pipeline = %self.pipeline.name(), operation = %stored.id, "Operation submitted");
        Ok(stored.id)
    }

    /// Queue every operation that has not finished
    ///
    /// Recovered operations restart at the first step; completed steps
    /// observe their persisted results and pass through.
    pub async fn recover(&self) -> Result<usize> {
        let unfinished = self.pipeline.manager().store().list_unfinished().await?;
        for operation in &unfinished {
            self.queue.add(operation.id);
        }
        info!(
            pipeline = %self.pipeline.name(),
            count = unfinished.len(),
            "Recovered unfinished operations"
        );
        Ok(unfinished.len())
    }

    /// Start `count` workers
    pub fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| {
                let pipeline = self.pipeline.clone();
                let queue = self.queue.clone();
                tokio::spawn(async move { run_worker(worker, pipeline, queue).await })
            })
            .collect()
    }

    /// Stop all workers after their current pass
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

async fn run_worker(worker: usize, pipeline: Arc<StepPipeline>, queue: Arc<WorkQueue>) {
    debug!(worker, "Worker started");

    while let Some(id) = queue.next().await {
        match pipeline.run(id).await {
            Ok(PassOutcome::Rescheduled { after, .. }) => {
                queue.add_after(id, after);
            }
            Ok(PassOutcome::Succeeded(_)) => {
                debug!(worker, operation = %id, "Operation finished");
            }
            Ok(PassOutcome::Failed { reason, .. }) => {
                debug!(worker, operation = %id, reason = %reason, "Operation finished with failure");
            }
            Err(e) if e.is_retryable() => {
                let after = pipeline.manager().store_error_retry_delay();
                warn!(worker, operation = %id, error = %e, after = ?after, "Pipeline pass failed, retrying");
                queue.add_after(id, after);
            }
            Err(e) => {
                error!(worker, operation = %id, error = %e, "Pipeline pass failed");
            }
        }
        queue.done(id);
    }

    debug!(worker, "Worker stopped");
}
