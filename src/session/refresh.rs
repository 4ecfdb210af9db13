//! Single-flight token renewal.
//!
//! Every caller passes the credential revision it last saw. Callers queue on
//! one lock; the first one through performs the network call, and the rest
//! find the revision already advanced and take the committed credential
//! instead of presenting a refresh token that rotation has invalidated.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::models::Credential;
use crate::net::AuthApi;
use crate::store::CredentialStore;

/// Callbacks run while the refresh lock is held, so the session's view
/// changes in the same critical section as the stored credential.
pub trait RefreshHooks: Send + Sync {
    /// About to call the refresh endpoint.
    fn refresh_started(&self) {}

    /// The new credential is committed at `revision`.
    fn refresh_committed(&self, _credential: &Credential, _revision: u64) {}

    /// The refresh failed for a reason other than being superseded.
    fn refresh_failed(&self, _error: &SessionError) {}
}

/// No-op hooks.
impl RefreshHooks for () {}

/// Serializes refresh attempts against one [`CredentialStore`].
pub struct RefreshCoordinator {
    api: AuthApi,
    store: Arc<CredentialStore>,
    lock: Mutex<()>,
}

impl RefreshCoordinator {
    pub fn new(api: AuthApi, store: Arc<CredentialStore>) -> Self {
        Self {
            api,
            store,
            lock: Mutex::new(()),
        }
    }

    /// Hold the refresh lock. Refreshes queue until the guard drops, and then
    /// join whatever credential was committed meanwhile.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Refresh the credential last observed at `observed_revision`.
    ///
    /// Returns the credential to use and its revision. Fails with
    /// [`SessionError::Superseded`] when the credential was cleared while
    /// waiting, without touching the session.
    pub async fn refresh_after(
        &self,
        observed_revision: u64,
        hooks: &dyn RefreshHooks,
    ) -> Result<(Credential, u64), SessionError> {
        let _guard = self.lock.lock().await;

        let current = self.store.revision();
        if current != observed_revision {
            return match self.store.get() {
                Some(credential) => {
                    debug!(observed_revision, current, "Joining refresh committed by another caller");
                    Ok((credential, current))
                }
                None => Err(SessionError::Superseded),
            };
        }

        let result = self.perform(observed_revision, hooks).await;
        match &result {
            Ok(_) | Err(SessionError::Superseded) => {}
            Err(e) => hooks.refresh_failed(e),
        }
        result
    }

    async fn perform(
        &self,
        observed_revision: u64,
        hooks: &dyn RefreshHooks,
    ) -> Result<(Credential, u64), SessionError> {
        let refresh_token = self.store.refresh_token().ok_or(SessionError::NoRefreshToken)?;
        // rotation keeps the tier chosen at login
        let persist_refresh = self.store.persist_refresh();

        hooks.refresh_started();
        let response = self.api.refresh(&refresh_token).await.map_err(|e| {
            if AuthApi::is_rejection(&e) {
                warn!(status = e.status, "Refresh token rejected by server");
            } else {
                warn!(status = e.status, error = %e, "Refresh request failed");
            }
            SessionError::RefreshRejected(e)
        })?;

        let rotated = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or(refresh_token);
        let credential = Credential::new(response.access_token, rotated);

        match self
            .store
            .replace_if_revision(observed_revision, &credential, persist_refresh)?
        {
            Some(revision) => {
                info!(revision, expires_at = ?credential.expires_at, "Token refreshed");
                hooks.refresh_committed(&credential, revision);
                Ok((credential, revision))
            }
            None => {
                info!("Session changed during refresh, discarding new token");
                Err(SessionError::Superseded)
            }
        }
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.store)
            .field("in_flight", &self.lock.try_lock().is_err())
            .finish()
    }
}
