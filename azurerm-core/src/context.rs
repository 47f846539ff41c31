//! Per-operation context handed to providers by the orchestrator

use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ProviderError, ProviderResult};
use crate::lock::{LockKey, LockRegistry, NamedLockGuard, OperationId};

/// What to do when a create finds a live resource at the target identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportPolicy {
    /// Fail with `AlreadyExists`; the resource must be imported first
    #[default]
    RequireImport,
    /// Overwrite the existing resource
    AllowOverwrite,
}

/// Everything one resource operation needs from its caller
#[derive(Debug, Clone)]
pub struct OperationContext {
    id: OperationId,
    locks: LockRegistry,
    cancel: CancellationToken,
    import_policy: ImportPolicy,
}

impl OperationContext {
    /// Create a context for a new operation; `cancel` is usually a child of the run's root token
    pub fn new(locks: &LockRegistry, cancel: CancellationToken) -> Self {
        Self {
            id: locks.next_operation_id(),
            locks: locks.clone(),
            cancel,
            import_policy: ImportPolicy::default(),
        }
    }

    pub fn with_import_policy(mut self, policy: ImportPolicy) -> Self {
        self.import_policy = policy;
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn import_policy(&self) -> ImportPolicy {
        self.import_policy
    }

    pub fn requires_import(&self) -> bool {
        self.import_policy == ImportPolicy::RequireImport
    }

    /// Fail fast if the orchestrator has cancelled the run
    pub fn check_cancelled(&self) -> ProviderResult<()> {
        if self.cancel.is_cancelled() {
            Err(ProviderError::new(
                ErrorKind::Cancelled,
                "operation cancelled",
            ))
        } else {
            Ok(())
        }
    }

    /// Lock a parent resource by type and name for the rest of the critical section
    pub async fn lock_by_name(
        &self,
        resource_type: &str,
        name: &str,
    ) -> ProviderResult<NamedLockGuard> {
        self.locks
            .acquire(self.id, LockKey::new(resource_type, name), &self.cancel)
            .await
    }
}
