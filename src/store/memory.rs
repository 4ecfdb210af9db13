//! In-memory storage tier.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::instrument;

use super::{KeyValueStore, StoreError};

/// In-memory key-value tier.
///
/// Uses `Arc<RwLock<HashMap>>` for thread-safe access. Contents live only as
/// long as the process, which makes it the natural ephemeral tier. Clones
/// share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key.
    pub fn wipe(&self) {
        if let Ok(mut guard) = self.inner.write() {
            guard.clear();
        }
    }
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Backend("memory store lock poisoned".to_string())
}

impl KeyValueStore for MemoryStore {
    #[instrument(skip(self))]
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.inner.read().map_err(poisoned)?;
        Ok(guard.get(key).cloned())
    }

    #[instrument(skip(self, value))]
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(poisoned)?;
        guard.remove(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let guard = self.inner.read().map_err(poisoned)?;
        Ok(guard.contains_key(key))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
