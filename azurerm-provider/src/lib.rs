//! AzureRM Provider
//!
//! Azure Resource Manager provider implementation.
//!
//! ## Module Structure
//!
//! - `client` - Control plane abstraction and long-running operation helpers
//! - `rest` - REST implementation of the control plane
//! - `config` - Provider configuration
//! - `models` - Wire models of the management API
//! - `resources` - Resource type definitions and handlers
//! - `provider` - AzureRmProvider implementation

pub mod client;
pub mod config;
pub mod models;
pub mod provider;
pub mod resources;
pub mod rest;

// Re-export main types
pub use client::{ControlPlane, DeleteOutcome};
pub use config::{ProviderConfig, Timeouts};
pub use provider::AzureRmProvider;
pub use rest::{RestControlPlane, StaticToken, TokenCredential};
