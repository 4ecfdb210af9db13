//! Two-tier credential persistence.
//!
//! | key                 | tier                                   |
//! |---------------------|----------------------------------------|
//! | `scx_access_token`  | ephemeral                              |
//! | `scx_refresh_token` | durable when remembered, else ephemeral |
//! | `scx_user`          | ephemeral                              |
//! | `scx_remember_me`   | ephemeral                              |
//!
//! Every successful `put` and every `clear` advances a revision counter.
//! Refresh logic reads the revision together with the token it sends and
//! commits its result only if nobody else changed the credential meanwhile.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, instrument, warn};

use super::{KeyValueStore, MemoryStore, StoreError};
use crate::models::{Credential, UserProfile};

pub const ACCESS_TOKEN_KEY: &str = "scx_access_token";
pub const REFRESH_TOKEN_KEY: &str = "scx_refresh_token";
pub const USER_KEY: &str = "scx_user";
pub const REMEMBER_KEY: &str = "scx_remember_me";

const ALL_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY, REMEMBER_KEY];

/// Token and profile storage shared by the session, the refresh logic and
/// the request chain.
pub struct CredentialStore {
    ephemeral: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    /// Current revision. The lock also serializes multi-key writes so no
    /// reader observes a half-written credential.
    revision: RwLock<u64>,
}

impl CredentialStore {
    pub fn new(ephemeral: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self {
            ephemeral,
            durable,
            revision: RwLock::new(0),
        }
    }

    /// Both tiers in memory. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// In-memory ephemeral tier over the given durable tier.
    pub fn with_durable(durable: Arc<dyn KeyValueStore>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), durable)
    }

    pub fn durable_backend(&self) -> &str {
        self.durable.name()
    }

    /// Current credential revision.
    pub fn revision(&self) -> u64 {
        *self.revision.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new credential. The refresh token goes to the durable tier when
    /// `persist_refresh` is set and is removed from the other tier.
    ///
    /// Returns the new revision.
    #[instrument(skip(self, credential))]
    pub fn put(&self, credential: &Credential, persist_refresh: bool) -> Result<u64, StoreError> {
        let mut revision = self.revision.write().unwrap_or_else(PoisonError::into_inner);
        self.write_credential(credential, persist_refresh)?;
        *revision += 1;
        debug!(revision = *revision, "Credential stored");
        Ok(*revision)
    }

    /// Store `credential` only if the revision is still `expected`.
    ///
    /// Returns `Ok(None)` without writing when the credential changed since
    /// `expected` was read.
    #[instrument(skip(self, credential))]
    pub fn replace_if_revision(
        &self,
        expected: u64,
        credential: &Credential,
        persist_refresh: bool,
    ) -> Result<Option<u64>, StoreError> {
        let mut revision = self.revision.write().unwrap_or_else(PoisonError::into_inner);
        if *revision != expected {
            debug!(expected, current = *revision, "Credential changed, discarding write");
            return Ok(None);
        }
        self.write_credential(credential, persist_refresh)?;
        *revision += 1;
        debug!(revision = *revision, "Credential replaced");
        Ok(Some(*revision))
    }

    fn write_credential(&self, credential: &Credential, persist_refresh: bool) -> Result<(), StoreError> {
        let (target, other) = if persist_refresh {
            (&self.durable, &self.ephemeral)
        } else {
            (&self.ephemeral, &self.durable)
        };
        target.set(REFRESH_TOKEN_KEY, &credential.refresh_token)?;
        self.ephemeral.set(REMEMBER_KEY, if persist_refresh { "true" } else { "false" })?;
        self.ephemeral.set(ACCESS_TOKEN_KEY, &credential.access_token)?;
        if let Err(e) = other.remove(REFRESH_TOKEN_KEY) {
            warn!(tier = other.name(), error = %e, "Failed to remove refresh token from other tier");
        }
        Ok(())
    }

    /// The stored credential, if both tokens are present.
    pub fn get(&self) -> Option<Credential> {
        let _guard = self.revision.read().unwrap_or_else(PoisonError::into_inner);
        let access = self.read(&self.ephemeral, ACCESS_TOKEN_KEY)?;
        let (refresh, _) = self.find_refresh_token()?;
        Some(Credential::new(access, refresh))
    }

    /// The access token and the revision it belongs to.
    pub fn access_token_with_revision(&self) -> (Option<String>, u64) {
        let guard = self.revision.read().unwrap_or_else(PoisonError::into_inner);
        (self.read(&self.ephemeral, ACCESS_TOKEN_KEY), *guard)
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token_with_revision().0
    }

    pub fn refresh_token(&self) -> Option<String> {
        let _guard = self.revision.read().unwrap_or_else(PoisonError::into_inner);
        self.find_refresh_token().map(|(token, _)| token)
    }

    /// Whether the current refresh token lives in the durable tier.
    ///
    /// Without a recorded choice (fresh process) the tier the token is found
    /// in decides.
    pub fn persist_refresh(&self) -> bool {
        let _guard = self.revision.read().unwrap_or_else(PoisonError::into_inner);
        match self.read(&self.ephemeral, REMEMBER_KEY).as_deref() {
            Some("true") => true,
            Some(_) => false,
            None => matches!(self.find_refresh_token(), Some((_, true))),
        }
    }

    /// Locate the refresh token. The flag is `true` when it came from the
    /// durable tier.
    fn find_refresh_token(&self) -> Option<(String, bool)> {
        match self.read(&self.ephemeral, REMEMBER_KEY).as_deref() {
            Some("true") => self.read(&self.durable, REFRESH_TOKEN_KEY).map(|t| (t, true)),
            Some(_) => self.read(&self.ephemeral, REFRESH_TOKEN_KEY).map(|t| (t, false)),
            None => self
                .read(&self.ephemeral, REFRESH_TOKEN_KEY)
                .map(|t| (t, false))
                .or_else(|| self.read(&self.durable, REFRESH_TOKEN_KEY).map(|t| (t, true))),
        }
    }

    /// Cache the user profile next to the access token.
    pub fn put_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let json = serde_json::to_string(user).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let _guard = self.revision.read().unwrap_or_else(PoisonError::into_inner);
        self.ephemeral.set(USER_KEY, &json)
    }

    /// The cached user profile. An unreadable entry counts as absent.
    pub fn get_user(&self) -> Option<UserProfile> {
        let _guard = self.revision.read().unwrap_or_else(PoisonError::into_inner);
        let json = self.read(&self.ephemeral, USER_KEY)?;
        match serde_json::from_str(&json) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached user");
                None
            }
        }
    }

    /// Whether any session key is present in either tier.
    pub fn has_any(&self) -> bool {
        let _guard = self.revision.read().unwrap_or_else(PoisonError::into_inner);
        ALL_KEYS.iter().any(|key| {
            self.read(&self.ephemeral, key).is_some() || self.read(&self.durable, key).is_some()
        })
    }

    /// Remove every session key from both tiers. Returns the new revision.
    #[instrument(skip(self))]
    pub fn clear(&self) -> u64 {
        let mut revision = self.revision.write().unwrap_or_else(PoisonError::into_inner);
        for tier in [&self.ephemeral, &self.durable] {
            for key in ALL_KEYS {
                if let Err(e) = tier.remove(key) {
                    error!(tier = tier.name(), key, error = %e, "Failed to remove credential key");
                }
            }
        }
        *revision += 1;
        debug!(revision = *revision, "Credential cleared");
        *revision
    }

    /// Read a key, treating storage errors as absence.
    fn read(&self, tier: &Arc<dyn KeyValueStore>, key: &str) -> Option<String> {
        match tier.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(tier = tier.name(), key, error = %e, "Credential read failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("ephemeral", &self.ephemeral.name())
            .field("durable", &self.durable.name())
            .field("revision", &self.revision())
            .finish()
    }
}
