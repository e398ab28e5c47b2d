//! Process-local admission store.
//!
//! Backs tests and `--store memory` local runs. Each operation holds at most
//! one map shard lock, so it has the same per-key atomicity as the remote
//! store and none of the cross-key guarantees.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use super::store::{AdmissionStore, StoreResult};

/// In-memory implementation of [`AdmissionStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    strings: DashMap<String, String>,
    lists: DashMap<String, Vec<String>>,
    get_count: AtomicU32,
    append_count: AtomicU32,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a string value, as the external worker would.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.strings.insert(key.into(), value.into());
    }

    /// Remove a string value.
    pub fn remove(&self, key: &str) {
        self.strings.remove(key);
    }

    /// Snapshot of a list.
    #[must_use]
    pub fn list(&self, key: &str) -> Vec<String> {
        self.lists
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of `get` calls served.
    #[must_use]
    pub fn get_count(&self) -> u32 {
        self.get_count.load(Ordering::Relaxed)
    }

    /// Number of `list_append` calls served.
    #[must_use]
    pub fn append_count(&self) -> u32 {
        self.append_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AdmissionStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.strings.get(key).map(|v| v.value().clone()))
    }

    async fn list_tail(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .lists
            .get(key)
            .and_then(|entry| entry.value().last().cloned()))
    }

    async fn list_append(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.append_count.fetch_add(1, Ordering::Relaxed);
        let mut list = self.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len() as u64)
    }
}
