//! Credential persistence.
//!
//! Provides the [`KeyValueStore`] tier trait and its implementations:
//! - [`MemoryStore`] - process-scoped storage, used as the ephemeral tier
//! - [`FileStore`] - one file per key, used as the durable tier
//! - [`KeyringStore`] - system keyring durable tier (requires `system-keyring` feature)
//!
//! [`CredentialStore`] sits on top of two tiers and decides where each key lives.
//!
//! All operations are synchronous: a write is visible to every reader in the
//! process as soon as the call returns.

pub mod credential;
pub mod file;
#[cfg(feature = "system-keyring")]
pub mod keyring;
pub mod memory;

use std::sync::Arc;

pub use credential::CredentialStore;
pub use file::FileStore;
#[cfg(feature = "system-keyring")]
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

use crate::config::{StorageBackend, StorageConfig};

/// Errors raised by a storage tier.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Key is not usable by this backend.
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    /// Backend-specific failure (keyring, poisoned lock, ...).
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A single storage tier.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Check whether `key` holds a value.
    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Name of this backend, for logs.
    fn name(&self) -> &str;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        (**self).contains(key)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the durable tier selected by configuration.
pub fn durable_from_config(config: &StorageConfig) -> Arc<dyn KeyValueStore> {
    match config.backend {
        StorageBackend::File => Arc::new(FileStore::new(&config.dir)),
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => Arc::new(KeyringStore::new()),
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => {
            tracing::warn!(
                "Keyring storage requested but system-keyring feature not enabled, falling back to file storage"
            );
            Arc::new(FileStore::new(&config.dir))
        }
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    }
}
