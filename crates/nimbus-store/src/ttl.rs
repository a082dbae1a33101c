//! Expiring key/value store for lock leases.
//!
//! A networked coordinator (Redis and the like) satisfies the same contract;
//! [`MemoryTtlStore`] is the single-process fallback.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::StoreResult;

/// Small TTL map. Expired entries behave as absent.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Current value of `key`, if present and not expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set `key` only when absent. Returns true when the value was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Extend `key`'s lifetime if it still holds `value`.
    async fn refresh(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remove `key` if it still holds `value`.
    async fn remove_if(&self, key: &str, value: &str) -> StoreResult<bool>;
}

/// In-process TTL store.
#[derive(Debug, Default)]
pub struct MemoryTtlStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.1 > now)
            .map(|e| e.0.clone()))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().1 > now {
                    return Ok(false);
                }
                e.insert((value.to_string(), now + ttl));
                Ok(true)
            }
            Entry::Vacant(e) => {
                e.insert((value.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn refresh(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut e) if e.0 == value && e.1 > now => {
                e.1 = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_if(&self, key: &str, value: &str) -> StoreResult<bool> {
        Ok(self.entries.remove_if(key, |_, (v, _)| v == value).is_some())
    }
}
