//! AzureRM Core
//!
//! Core library for managing Azure Resource Manager resources: effects as
//! values, long-running operation polling, named locks and ARM identifiers.

pub mod context;
pub mod differ;
pub mod effect;
pub mod error;
pub mod id;
pub mod interpreter;
pub mod lock;
pub mod plan;
pub mod poll;
pub mod provider;
pub mod resource;
pub mod schema;
