//! Kestrel Cloud Logging Service (CLS)
//!
//! Everything a workflow step needs to provision and bind a managed logging
//! instance through the Service Manager:
//!
//! ```text
//! ┌──────────────┐   region   ┌────────────────────┐
//! │    Config    │──────────▶│ find_credentials    │
//! └──────────────┘            └─────────┬──────────┘
//!                                       ▼
//!                  ┌──────────────────────────────────┐
//!                  │ ClientFactory::for_credentials   │
//!                  └─────────┬────────────────────────┘
//!                            ▼
//!   ┌────────────┐   ┌───────────────┐   ┌────────────────────────┐
//!   │ ClsClient  │──▶│ ServiceManager│──▶│ encrypt / decrypt /    │
//!   │            │   │ Client (trait)│   │ render overrides       │
//!   └────────────┘   └───────────────┘   └────────────────────────┘
//! ```
//!
//! The client itself neither retries nor persists. Stable instance and
//! binding IDs are supplied by the caller so repeated calls stay idempotent.

pub mod client;
pub mod config;
pub mod error;
pub mod overrides;
pub mod servicemanager;
pub mod version;

pub use client::*;
pub use config::*;
pub use error::*;
pub use overrides::*;
pub use servicemanager::{
    BindingResponse, ClientFactory, OperationResponse, ProvisioningInput, ServiceManagerClient,
    ServiceManagerError,
};
pub use version::*;

/// Component name used for CLS overrides in the cluster configuration
pub const COMPONENT_NAME: &str = "cls";
