//! Kestrel Workflow Engine
//!
//! Drives add-on operations through an ordered list of idempotent steps.
//! All resumable state lives in the persisted operation; workers hold
//! nothing across a reschedule.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              WorkerPool                              │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │          WorkQueue                          │    │
//! │  │   due-time ordered, one worker per op       │    │
//! │  └─────────────────────────────────────────────┘    │
//! │                      │                               │
//! │                      ▼                               │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │           StepPipeline                      │    │
//! │  │   Provision | Bind | Deprovision ...        │    │
//! │  └─────────────────────────────────────────────┘    │
//! │                      │                               │
//! │                      ▼                               │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │   OperationManager → OperationStore (CAS)   │    │
//! │  │   conflict → retry now | temporary → later  │    │
//! │  └─────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kestrel_workflow::{
//!     cls_provisioning_pipeline, MemoryOperationStore, OperationManager, WorkerPool,
//!     WorkflowSettings,
//! };
//! use std::sync::Arc;
//!
//! let settings = WorkflowSettings::default();
//! let store = Arc::new(MemoryOperationStore::new());
//! let manager = Arc::new(OperationManager::new(store).with_settings(&settings));
//! let pipeline = cls_provisioning_pipeline(context, secret_key, &settings);
//!
//! let pool = WorkerPool::new(Arc::new(pipeline));
//! pool.recover().await?;
//! pool.spawn_workers(settings.workers);
//! pool.submit(operation).await?;
//! ```

pub mod clock;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod queue;
pub mod settings;
pub mod step;
pub mod steps;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use clock::*;
pub use error::*;
pub use manager::*;
pub use pipeline::*;
pub use queue::*;
pub use settings::*;
pub use step::*;
pub use steps::*;
pub use store::*;
pub use worker::*;
