//! Session lifecycle.
//!
//! # Architecture
//!
//! - [`Session`] - Owns the credential store, the state machine and the
//!   refresh machinery. One per signed-in client.
//! - [`StateMachine`] - Phase transitions, published on a `watch` channel
//! - [`RefreshCoordinator`] - Single-flight token renewal
//! - [`RefreshScheduler`] - Proactive refresh timer
//! - [`SessionController`] - The narrow view the interception chain gets of
//!   the session
//!
//! # Example
//!
//! ```rust,ignore
//! use scx_session::{Config, CredentialStore, Session};
//!
//! let session = Session::from_config(&config, Arc::new(CredentialStore::in_memory()))?;
//! session.restore().await;
//! session.login("ops@scx.io", "secret", true).await?;
//! let suppliers: Vec<Supplier> = session.client().get_json("/suppliers").await?;
//! session.logout().await;
//! ```

pub mod refresh;
pub mod scheduler;
pub mod state;

pub use refresh::{RefreshCoordinator, RefreshHooks};
pub use scheduler::RefreshScheduler;
pub use state::{Event, Phase, SessionState, StateMachine};

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::{Config, SessionConfig};
use crate::error::{RequestError, SessionError};
use crate::models::{Credential, LoginRequest, Role, UserProfile};
use crate::navigation::{Navigation, Navigator};
use crate::net::{ApiClient, AuthApi, AuthPaths, HttpTransport, InterceptionChain};
use crate::store::CredentialStore;
use crate::token::{self, TokenDiagnostics};

// =============================================================================
// SessionController
// =============================================================================

/// What the interception chain may ask of the session.
#[async_trait]
pub trait SessionController: Send + Sync {
    /// Single-flight refresh of the credential observed at `observed_revision`.
    async fn refresh_after(&self, observed_revision: u64) -> Result<(Credential, u64), SessionError>;

    /// End the session, unless the credential already moved past
    /// `observed_revision`.
    async fn force_logout(&self, observed_revision: u64, reason: &str);

    fn has_refresh_token(&self) -> bool;

    fn credential_revision(&self) -> u64;
}

// =============================================================================
// Session
// =============================================================================

pub struct Session {
    me: Weak<Session>,
    timings: SessionConfig,
    api: AuthApi,
    store: Arc<CredentialStore>,
    state: StateMachine,
    coordinator: RefreshCoordinator,
    scheduler: RefreshScheduler,
    navigator: Navigator,
}

impl Session {
    pub fn new(
        transport: HttpTransport,
        paths: AuthPaths,
        store: Arc<CredentialStore>,
        timings: SessionConfig,
    ) -> Arc<Self> {
        let api = AuthApi::new(transport, paths);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            timings,
            coordinator: RefreshCoordinator::new(api.clone(), Arc::clone(&store)),
            api,
            store,
            state: StateMachine::new(),
            scheduler: RefreshScheduler::new(),
            navigator: Navigator::new(),
        })
    }

    /// Build a session from the `[api]` and `[session]` config sections.
    pub fn from_config(
        config: &Config,
        store: Arc<CredentialStore>,
    ) -> Result<Arc<Self>, url::ParseError> {
        let transport = HttpTransport::from_config(&config.api)?;
        Ok(Self::new(
            transport,
            AuthPaths::from_config(&config.api),
            store,
            config.session.clone(),
        ))
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Derive the initial state from what the store holds.
    ///
    /// A valid access token with a cached user resumes directly. Otherwise a
    /// stored refresh token gets one refresh attempt. Anything else leaves the
    /// session signed out. Does nothing unless currently unauthenticated.
    pub async fn restore(&self) -> SessionState {
        if self.state.phase() != Phase::Unauthenticated {
            return self.state.current();
        }

        let access = self
            .store
            .access_token()
            .filter(|t| !token::is_expired(t, self.timings.expiry_skew_secs));
        if let (Some(access), Some(user)) = (access, self.store.get_user()) {
            let revision = self.store.revision();
            if self.state.apply(Event::Restored(user)).is_ok() {
                info!(revision, "Session restored from stored credential");
                self.schedule_refresh(&access, revision);
            }
            return self.state.current();
        }

        if self.store.refresh_token().is_some() {
            if self.state.apply(Event::LoginStarted).is_err() {
                return self.state.current();
            }
            debug!("Access token missing or expired, refreshing stored session");
            let outcome = self
                .coordinator
                .refresh_after(self.store.revision(), self)
                .await;
            self.settle_restore(outcome);
            return self.state.current();
        }

        if self.store.has_any() {
            debug!("Clearing incomplete stored session");
            self.store.clear();
        }
        self.state.current()
    }

    /// The hooks move the state when the refresh ran here. When it was joined
    /// or superseded instead, the state is still `Authenticating`.
    fn settle_restore(&self, outcome: Result<(Credential, u64), SessionError>) {
        if self.state.phase() != Phase::Authenticating {
            return;
        }
        match outcome {
            Ok((credential, revision)) => self.publish_refreshed(&credential, revision),
            Err(e) => {
                debug!(error = %e, "Stored session could not be resumed");
                let _ = self.state.apply(Event::Logout);
            }
        }
    }

    /// Sign in, replacing any current session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<UserProfile, SessionError> {
        let _guard = self.coordinator.exclusive().await;

        if self.state.phase() != Phase::Unauthenticated {
            self.end_session_locally("replaced by a new login", false);
        }
        self.state.apply(Event::LoginStarted)?;
        let revision = self.store.revision();

        let request = LoginRequest::new(email, password).remember(remember_me);
        let response = match self.api.login(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(status = e.status, kind = %e.kind, "Login failed");
                self.surface_login_failure(&e.message);
                return Err(e.into());
            }
        };

        let Some(user) = response.profile() else {
            let e = RequestError::invalid_body(200, "no user profile in login response");
            self.surface_login_failure(&e.message);
            return Err(e.into());
        };

        let credential = Credential::new(response.access_token, response.refresh_token);
        let committed =
            match self
                .store
                .replace_if_revision(revision, &credential, request.persist_refresh())
            {
                Ok(Some(committed)) => committed,
                Ok(None) => {
                    info!("Session reset while signing in, discarding credential");
                    return Err(SessionError::Superseded);
                }
                Err(e) => {
                    self.store.clear();
                    let e = SessionError::from(e);
                    self.surface_login_failure(&e.user_message());
                    return Err(e);
                }
            };
        if let Err(e) = self.store.put_user(&user) {
            warn!(error = %e, "Failed to cache user profile");
        }

        self.state.apply(Event::LoginSucceeded(user.clone()))?;
        info!(
            user_id = %user.id,
            remember_me,
            revision = committed,
            "Signed in"
        );
        self.schedule_refresh(&credential.access_token, committed);
        Ok(user)
    }

    fn surface_login_failure(&self, message: &str) {
        if let Err(e) = self.state.apply(Event::LoginFailed(message.to_string())) {
            debug!(error = %e, "Login failure not published");
            return;
        }
        let _ = self.state.apply(Event::FailureSurfaced);
    }

    /// Refresh now, sharing any refresh already in flight.
    pub async fn refresh(&self) -> Result<Credential, SessionError> {
        self.coordinator
            .refresh_after(self.store.revision(), self)
            .await
            .map(|(credential, _)| credential)
    }

    /// Sign out. The local session ends first, then the server is told on a
    /// best-effort basis.
    pub async fn logout(&self) {
        let refresh = self.store.refresh_token();
        let access = self.store.access_token();

        self.end_session_locally("logout", true);

        if let Some(refresh) = refresh {
            if let Err(e) = self.api.logout(&refresh, access.as_deref()).await {
                warn!(status = e.status, error = %e, "Server-side logout failed");
            }
        }
        info!("Signed out");
    }

    /// Fetch the server's view of the signed-in user and cache it.
    pub async fn fetch_current_user(self: &Arc<Self>) -> Result<UserProfile, SessionError> {
        let user: UserProfile = self.client().get_json(&self.api.paths().me).await?;
        if let Err(e) = self.store.put_user(&user) {
            warn!(error = %e, "Failed to cache user profile");
        }
        if self.state.phase() == Phase::Authenticated {
            self.state.apply(Event::UserUpdated(user.clone()))?;
        }
        Ok(user)
    }

    /// Stop the proactive timer without touching the stored credential.
    pub fn shutdown(&self) {
        self.scheduler.cancel();
    }

    /// Check that an authenticated state is still backed by a live
    /// credential.
    ///
    /// A missing credential ends the session. An expired access token goes
    /// through the single-flight refresh, which ends the session on failure.
    pub async fn validate(&self) -> bool {
        if self.state.phase() != Phase::Authenticated {
            return true;
        }
        let revision = self.store.revision();
        let Some(credential) = self.store.get() else {
            warn!("Authenticated without a stored credential, ending session");
            self.end_session_locally("credential missing", true);
            return false;
        };
        if !credential.is_expired(self.timings.expiry_skew_secs) {
            return true;
        }
        debug!(revision, "Access token expired while authenticated, refreshing");
        match self.coordinator.refresh_after(revision, self).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Session could not be revalidated");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// A client whose requests go through the standard interception chain.
    pub fn client(self: &Arc<Self>) -> ApiClient {
        let controller: Arc<dyn SessionController> = self.clone();
        ApiClient::new(InterceptionChain::standard(
            self.api.transport().clone(),
            controller,
            Arc::clone(&self.store),
            self.navigator.clone(),
            self.api.paths().clone(),
            self.timings.expiry_skew_secs,
        ))
    }

    /// Signed in with an access token that is not yet expired.
    pub fn is_authenticated(&self) -> bool {
        self.state.phase() == Phase::Authenticated && self.has_valid_token()
    }

    /// A stored access token that is not yet expired, whatever the phase.
    pub fn has_valid_token(&self) -> bool {
        self.store
            .access_token()
            .is_some_and(|t| !token::is_expired(&t, self.timings.expiry_skew_secs))
    }

    /// Roles from the access token, or from the cached user when the token
    /// carries none.
    pub fn effective_roles(&self) -> BTreeSet<Role> {
        let from_token = self
            .store
            .access_token()
            .map(|t| token::roles(&t))
            .unwrap_or_default();
        if !from_token.is_empty() {
            return from_token;
        }
        self.current_user().map(|u| u.roles).unwrap_or_default()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.current().user
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn navigation(&self) -> broadcast::Receiver<Navigation> {
        self.navigator.subscribe()
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn timings(&self) -> &SessionConfig {
        &self.timings
    }

    pub fn diagnostics(&self) -> TokenDiagnostics {
        TokenDiagnostics::inspect(
            self.store.access_token().as_deref(),
            self.timings.expiry_skew_secs,
        )
    }

    /// The access token is inside the refresh window.
    pub fn should_refresh_soon(&self) -> bool {
        self.store
            .access_token()
            .is_some_and(|t| token::should_refresh(&t, self.timings.refresh_window_secs))
    }

    /// Whether the proactive refresh timer is pending.
    pub fn refresh_scheduled(&self) -> bool {
        self.scheduler.is_armed()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn end_session_locally(&self, reason: &str, navigate: bool) {
        self.scheduler.cancel();
        let revision = self.store.clear();

        let event = if self.state.phase() == Phase::Refreshing {
            Event::RefreshFailed(reason.to_string())
        } else {
            Event::Logout
        };
        if let Err(e) = self.state.apply(event) {
            debug!(error = %e, "Session end not published");
        }
        info!(reason, revision, "Session ended");

        if navigate {
            self.navigator.emit(Navigation::Login);
        }
    }

    /// Publish a committed credential and arm the next proactive refresh.
    fn publish_refreshed(&self, credential: &Credential, revision: u64) {
        let user = self
            .state
            .current()
            .user
            .or_else(|| self.store.get_user())
            .or_else(|| {
                token::decode(&credential.access_token)
                    .ok()
                    .map(|claims| UserProfile::from_claims(&claims))
            });
        let Some(user) = user else {
            warn!("Refreshed token carries no user, ending session");
            self.end_session_locally("refreshed token carries no user", true);
            return;
        };
        if self.store.get_user().is_none() {
            if let Err(e) = self.store.put_user(&user) {
                warn!(error = %e, "Failed to cache user profile");
            }
        }

        let event = match self.state.phase() {
            Phase::Refreshing => Some(Event::RefreshSucceeded(user)),
            Phase::Authenticating => Some(Event::LoginSucceeded(user)),
            Phase::Unauthenticated => Some(Event::Restored(user)),
            Phase::Authenticated | Phase::Failed => None,
        };
        if let Some(Err(e)) = event.map(|event| self.state.apply(event)) {
            debug!(error = %e, "Refresh result not published");
        }
        self.schedule_refresh(&credential.access_token, revision);
    }

    /// Arm the proactive refresh `refresh_lead_secs` before expiry.
    fn schedule_refresh(&self, access_token: &str, revision: u64) {
        let remaining = token::time_remaining(access_token);
        let lead = self.timings.refresh_lead_secs;
        if remaining <= lead {
            debug!(remaining, lead, "Token too close to expiry for a proactive refresh");
            self.scheduler.cancel();
            return;
        }

        let me = self.me.clone();
        self.scheduler
            .arm(Duration::from_secs(remaining - lead), move |epoch| async move {
                let Some(session) = me.upgrade() else {
                    return;
                };
                if !session.scheduler.release(epoch) {
                    return;
                }
                if session.state.phase() != Phase::Authenticated {
                    debug!(phase = %session.state.phase(), "Skipping proactive refresh");
                    return;
                }
                debug!(revision, "Proactive refresh firing");
                if let Err(e) = session
                    .coordinator
                    .refresh_after(revision, session.as_ref())
                    .await
                {
                    debug!(error = %e, "Proactive refresh did not complete");
                }
            });
    }
}

impl RefreshHooks for Session {
    fn refresh_started(&self) {
        if let Err(e) = self.state.apply(Event::RefreshStarted) {
            debug!(error = %e, "Refresh running outside an active session");
        }
    }

    fn refresh_committed(&self, credential: &Credential, revision: u64) {
        self.publish_refreshed(credential, revision);
    }

    fn refresh_failed(&self, error: &SessionError) {
        warn!(error = %error, "Refresh failed, ending session");
        self.end_session_locally(&error.user_message(), true);
    }
}

#[async_trait]
impl SessionController for Session {
    async fn refresh_after(&self, observed_revision: u64) -> Result<(Credential, u64), SessionError> {
        self.coordinator.refresh_after(observed_revision, self).await
    }

    async fn force_logout(&self, observed_revision: u64, reason: &str) {
        let _guard = self.coordinator.exclusive().await;
        let current = self.store.revision();
        if current != observed_revision {
            debug!(observed_revision, current, "Credential already replaced, not logging out");
            return;
        }
        self.end_session_locally(reason, true);
    }

    fn has_refresh_token(&self) -> bool {
        self.store.refresh_token().is_some()
    }

    fn credential_revision(&self) -> u64 {
        self.store.revision()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.state.phase())
            .field("revision", &self.store.revision())
            .field("base_url", &self.api.transport().base_url())
            .finish()
    }
}
