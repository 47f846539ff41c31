//! Named locks serialising mutations against a shared parent resource
//!
//! Two child resources of the same parent (e.g., two extensions on one App
//! Service) must not be installed or removed concurrently. Operations take an
//! advisory lock keyed by the parent's type and name before mutating. Locks are
//! process-local and owned by a [`LockRegistry`] the orchestrator passes to
//! every operation.
//!
//! Locks are not reentrant: an operation that asks for a key it already holds
//! gets an error instead of deadlocking against itself.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ProviderError, ProviderResult};

/// Identity of one logical operation holding locks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Key of a named lock: (parent resource type, parent resource name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub resource_type: String,
    pub name: String,
}

impl LockKey {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.name)
    }
}

#[derive(Default)]
struct Registry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    holders: DashMap<LockKey, OperationId>,
    next_operation: AtomicU64,
}

impl Registry {
    /// Drop the table entry for `key` when only `users` references to its
    /// mutex remain besides the table's own
    fn prune(&self, key: &LockKey, users: usize) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) <= users + 1);
    }
}

/// Lock table shared by all operations of one orchestration run
#[derive(Clone, Default)]
pub struct LockRegistry {
    inner: Arc<Registry>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_operation_id(&self) -> OperationId {
        OperationId(self.inner.next_operation.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Acquire the lock for `key` on behalf of `owner`.
    ///
    /// Waits while another operation holds it. Fails immediately if `owner`
    /// already holds it, and with `ErrorKind::Cancelled` if `cancel` fires first.
    pub async fn acquire(
        &self,
        owner: OperationId,
        key: LockKey,
        cancel: &CancellationToken,
    ) -> ProviderResult<NamedLockGuard> {
        if self
            .inner
            .holders
            .get(&key)
            .is_some_and(|holder| *holder == owner)
        {
            return Err(ProviderError::new(
                ErrorKind::Lock,
                format!("{} already holds the lock on {}", owner, key),
            ));
        }

        let mutex = self.inner.locks.entry(key.clone()).or_default().clone();
        log::debug!("{} waiting for lock on {}", owner, key);
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = mutex.lock_owned() => Some(guard),
        };
        let Some(guard) = acquired else {
            self.inner.prune(&key, 0);
            return Err(ProviderError::new(
                ErrorKind::Cancelled,
                format!("cancelled while waiting for lock on {}", key),
            ));
        };
        self.inner.holders.insert(key.clone(), owner);
        log::debug!("{} locked {}", owner, key);

        Ok(NamedLockGuard {
            key,
            owner,
            registry: Arc::clone(&self.inner),
            _guard: guard,
        })
    }

    pub fn is_locked(&self, key: &LockKey) -> bool {
        self.inner.holders.contains_key(key)
    }

    pub fn holder(&self, key: &LockKey) -> Option<OperationId> {
        self.inner.holders.get(key).map(|h| *h)
    }
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("held", &self.inner.holders.len())
            .finish()
    }
}

/// Releases its lock when dropped, whatever the outcome of the protected operation
pub struct NamedLockGuard {
    key: LockKey,
    owner: OperationId,
    registry: Arc<Registry>,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        // holder entry goes before the mutex guard field is dropped
        self.registry
            .holders
            .remove_if(&self.key, |_, holder| *holder == self.owner);
        // keep the entry while another operation is waiting on the mutex
        self.registry.prune(&self.key, 1);
        log::debug!("{} unlocked {}", self.owner, self.key);
    }
}

impl fmt::Debug for NamedLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedLockGuard")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key() -> LockKey {
        LockKey::new("azurerm_app_service", "web")
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let locks = LockRegistry::new();
        let op = locks.next_operation_id();
        let cancel = CancellationToken::new();

        let guard = locks.acquire(op, key(), &cancel).await.unwrap();
        assert!(locks.is_locked(&key()));
        assert_eq!(locks.holder(&key()), Some(op));

        drop(guard);
        assert!(!locks.is_locked(&key()));
        assert!(locks.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn reentrant_acquire_is_rejected() {
        let locks = LockRegistry::new();
        let op = locks.next_operation_id();
        let cancel = CancellationToken::new();

        let _guard = locks.acquire(op, key(), &cancel).await.unwrap();
        let err = locks.acquire(op, key(), &cancel).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lock);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = LockRegistry::new();
        let cancel = CancellationToken::new();
        let a = locks.next_operation_id();
        let b = locks.next_operation_id();

        let _one = locks.acquire(a, key(), &cancel).await.unwrap();
        let _two = locks
            .acquire(b, LockKey::new("azurerm_app_service", "api"), &cancel)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_operation_waits_for_release() {
        let locks = LockRegistry::new();
        let cancel = CancellationToken::new();
        let first = locks.next_operation_id();
        let second = locks.next_operation_id();

        let guard = locks.acquire(first, key(), &cancel).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let guard = locks.acquire(second, key(), &cancel).await.unwrap();
                guard.key().clone()
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(locks.holder(&key()), Some(first));
        drop(guard);
        // the waiter still references the mutex
        assert_eq!(locks.inner.locks.len(), 1);

        assert_eq!(waiter.await.unwrap(), key());
        assert!(locks.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn table_does_not_grow_with_released_names() {
        let locks = LockRegistry::new();
        let cancel = CancellationToken::new();

        for i in 0..100 {
            let op = locks.next_operation_id();
            let name = format!("web-{}", i);
            let _guard = locks
                .acquire(op, LockKey::new("azurerm_app_service", name), &cancel)
                .await
                .unwrap();
        }
        assert!(locks.inner.locks.is_empty());
        assert!(locks.inner.holders.is_empty());
    }

    #[tokio::test]
    async fn cancelled_while_waiting() {
        let locks = LockRegistry::new();
        let cancel = CancellationToken::new();
        let first = locks.next_operation_id();
        let second = locks.next_operation_id();

        let guard = locks.acquire(first, key(), &cancel).await.unwrap();
        cancel.cancel();
        let err = locks.acquire(second, key(), &cancel).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);

        drop(guard);
        assert!(locks.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn lock_released_when_operation_fails() {
        let locks = LockRegistry::new();
        let cancel = CancellationToken::new();
        let op = locks.next_operation_id();

        let result: ProviderResult<()> = async {
            let _guard = locks.acquire(op, key(), &cancel).await?;
            Err(ProviderError::remote("install failed"))
        }
        .await;

        assert!(result.is_err());
        assert!(!locks.is_locked(&key()));
    }
}
