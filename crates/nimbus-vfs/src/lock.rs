//! Per-tenant read/write locking.
//!
//! # Concurrency Model
//!
//! - One named lock per tenant resource (`"<tenant>/vfs"`), kept in a
//!   `DashMap` owned by the [`LockManager`] of the process
//! - Structural mutations take the write lock, lookups and reads take the
//!   read lock; every public operation acquires it fresh
//! - Write handles release the lock while bytes stream and re-acquire the
//!   write lock for their close step
//! - Long operations hold a [`LongOperationLock`]: the write lock plus a
//!   lease in a [`TtlStore`], refreshed in the background so an external
//!   coordinator does not reclaim it mid-scan
//!
//! Locks are not reentrant. A caller holding a guard must not call another
//! locking operation of the same tenant.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;

use nimbus_store::TtlStore;

use crate::error::{VfsError, VfsResult};

/// Held read lock.
pub type ReadGuard = OwnedRwLockReadGuard<()>;

/// Held write lock.
pub type WriteGuard = OwnedRwLockWriteGuard<()>;

/// Registry of named read/write locks.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `name`, created on first use.
    fn lock_for(&self, name: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Handle on the VFS lock of one tenant.
    pub fn vfs_lock(&self, tenant: &str, timeout: Duration) -> VfsLock {
        let name = format!("{tenant}/vfs");
        VfsLock {
            lock: self.lock_for(&name),
            name,
            timeout,
        }
    }
}

/// The VFS lock of one tenant.
#[derive(Debug, Clone)]
pub struct VfsLock {
    name: String,
    lock: Arc<RwLock<()>>,
    timeout: Duration,
}

impl VfsLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the read lock.
    pub async fn read(&self) -> VfsResult<ReadGuard> {
        tokio::time::timeout(self.timeout, Arc::clone(&self.lock).read_owned())
            .await
            .map_err(|_| VfsError::LockTimeout(self.name.clone()))
    }

    /// Acquire the write lock.
    pub async fn write(&self) -> VfsResult<WriteGuard> {
        tokio::time::timeout(self.timeout, Arc::clone(&self.lock).write_owned())
            .await
            .map_err(|_| VfsError::LockTimeout(self.name.clone()))
    }
}

/// Write lock whose lease auto-refreshes while a long operation runs.
pub struct LongOperationLock {
    _guard: WriteGuard,
    ttl_store: Arc<dyn TtlStore>,
    key: String,
    token: String,
    refresher: JoinHandle<()>,
}

impl LongOperationLock {
    /// Take the write lock and a lease of `ttl` in `ttl_store`.
    pub async fn acquire(
        lock: &VfsLock,
        ttl_store: Arc<dyn TtlStore>,
        ttl: Duration,
    ) -> VfsResult<Self> {
        let guard = lock.write().await?;
        let key = format!("lock:{}", lock.name());
        let token = nimbus_types::new_internal_id();

        let deadline = tokio::time::Instant::now() + lock.timeout;
        while !ttl_store.set_if_absent(&key, &token, ttl).await? {
            if tokio::time::Instant::now() >= deadline {
                return Err(VfsError::LockTimeout(format!("{key} is leased elsewhere")));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "long operation lock acquired");

        let refresher = {
            let ttl_store = Arc::clone(&ttl_store);
            let key = key.clone();
            let token = token.clone();
            let period = (ttl / 3).max(Duration::from_millis(10));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    match ttl_store.refresh(&key, &token, ttl).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(key = %key, "lease lost before release");
                            break;
                        }
                        Err(e) => tracing::warn!(key = %key, error = %e, "lease refresh failed"),
                    }
                }
            })
        };

        Ok(Self {
            _guard: guard,
            ttl_store,
            key,
            token,
            refresher,
        })
    }

    /// Release the lease and the write lock.
    pub async fn release(self) {
        self.refresher.abort();
        if let Err(e) = self.ttl_store.remove_if(&self.key, &self.token).await {
            tracing::warn!(key = %self.key, error = %e, "lease release failed");
        }
    }
}

impl Drop for LongOperationLock {
    fn drop(&mut self) {
        self.refresher.abort();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let ttl_store = Arc::clone(&self.ttl_store);
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                if let Err(e) = ttl_store.remove_if(&key, &token).await {
                    tracing::warn!(%key, error = %e, "lease release failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_store::MemoryTtlStore;

    fn lock() -> VfsLock {
        Arc::new(LockManager::new()).vfs_lock("alice", Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_readers_share() {
        let l = lock();
        let _a = l.read().await.unwrap();
        let _b = l.read().await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_excludes_and_times_out() {
        let l = lock();
        let _w = l.write().await.unwrap();
        assert!(matches!(l.read().await, Err(VfsError::LockTimeout(_))));
        assert!(matches!(l.write().await, Err(VfsError::LockTimeout(_))));
    }

    #[tokio::test]
    async fn test_same_tenant_same_lock() {
        let m = Arc::new(LockManager::new());
        let a = m.vfs_lock("alice", Duration::from_millis(50));
        let b = m.vfs_lock("alice", Duration::from_millis(50));
        let c = m.vfs_lock("bob", Duration::from_millis(50));
        let _w = a.write().await.unwrap();
        assert!(b.write().await.is_err());
        assert!(c.write().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_lock_keeps_lease_alive() {
        let l = lock();
        let store: Arc<dyn TtlStore> = Arc::new(MemoryTtlStore::new());
        let long = LongOperationLock::acquire(&l, Arc::clone(&store), Duration::from_secs(3))
            .await
            .unwrap();
        let key = "lock:alice/vfs";
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            assert!(store.get(key).await.unwrap().is_some(), "lease expired while held");
        }
        assert!(l.read().await.is_err());
        long.release().await;
        assert!(store.get(key).await.unwrap().is_none());
        assert!(l.read().await.is_ok());
    }
}
