//! AzureRM State Management
//!
//! Persists the identifier and last-read attributes of every managed
//! resource, with a lock file guarding concurrent runs.
//!
//! - **StateFile**: all managed resources of one configuration
//! - **StateBackend**: storage for the state file (currently a local JSON file)
//! - **LockInfo**: who holds the state lock and until when
//!
//! # Example
//!
//! ```ignore
//! use azurerm_state::{create_backend, BackendConfig};
//!
//! let backend = create_backend(&BackendConfig::local("azurerm.state.json"))?;
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply effects, upsert resource states ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, SENSITIVE_PLACEHOLDER, StateFile};
