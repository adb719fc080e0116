//! Kestrel Operation Model
//!
//! Persisted record types shared by the provisioning client and the step
//! engine.
//!
//! # Records
//!
//! - `Operation` - One in-flight add-on workflow, versioned by `update_count`
//! - `AddOnState` - What the workflow knows about the managed instance
//! - `InstanceKey` - Stable identity of the instance at the Service Manager
//! - `ComponentOverrides` - Transient configuration handed to the cluster layer

pub mod error;
pub mod operation;
pub mod overrides;

pub use error::*;
pub use operation::*;
pub use overrides::*;
