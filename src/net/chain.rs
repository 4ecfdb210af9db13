//! Request interception chain.
//!
//! ```text
//! caller -> AuthInjector -> RefreshOnUnauthorized -> ErrorNormalizer -> transport
//! ```
//!
//! Each layer receives the request and a [`Next`] handle to the rest of the
//! chain. A layer may short-circuit, rewrite the request, or call `next`
//! more than once (the replay after a refresh does exactly that).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::auth_api::AuthPaths;
use super::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::error::{RequestError, SessionError};
use crate::navigation::{Navigation, Navigator};
use crate::session::SessionController;
use crate::store::CredentialStore;
use crate::token;

/// One layer of the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: ApiRequest, next: Next<'_>) -> Result<ApiResponse, RequestError>;

    fn name(&self) -> &'static str;
}

/// The remaining layers plus the transport at the bottom.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    transport: &'a HttpTransport,
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub async fn run(self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        match self.rest.split_first() {
            Some((layer, rest)) => {
                let next = Next {
                    transport: self.transport,
                    rest,
                };
                layer.handle(request, next).await
            }
            None => self.transport.send(&request).await,
        }
    }
}

/// An ordered list of middlewares over a transport.
#[derive(Clone)]
pub struct InterceptionChain {
    transport: HttpTransport,
    layers: Vec<Arc<dyn Middleware>>,
}

impl InterceptionChain {
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            layers: Vec::new(),
        }
    }

    /// Append a layer. Layers run in insertion order, outermost first.
    pub fn with(mut self, layer: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    /// The standard session chain: inject, refresh on 401, normalize.
    pub fn standard(
        transport: HttpTransport,
        controller: Arc<dyn SessionController>,
        store: Arc<CredentialStore>,
        navigator: Navigator,
        paths: AuthPaths,
        skew_secs: i64,
    ) -> Self {
        Self::new(transport)
            .with(AuthInjector {
                controller: controller.clone(),
                store,
                paths: paths.clone(),
                skew_secs,
            })
            .with(RefreshOnUnauthorized { controller, paths })
            .with(ErrorNormalizer { navigator })
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        Next {
            transport: &self.transport,
            rest: &self.layers,
        }
        .run(request)
        .await
    }
}

// ---------------------------------------------------------------------------
// AuthInjector
// ---------------------------------------------------------------------------

/// Attaches `Authorization: Bearer <access token>` and records which
/// credential revision the token came from.
///
/// A token that is already expired is refreshed before sending.
pub struct AuthInjector {
    controller: Arc<dyn SessionController>,
    store: Arc<CredentialStore>,
    paths: AuthPaths,
    skew_secs: i64,
}

#[async_trait]
impl Middleware for AuthInjector {
    async fn handle(&self, mut request: ApiRequest, next: Next<'_>) -> Result<ApiResponse, RequestError> {
        if self.paths.is_exempt(request.route()) {
            return next.run(request).await;
        }

        let (mut bearer, mut revision) = self.store.access_token_with_revision();
        let expired = bearer
            .as_deref()
            .is_some_and(|t| token::is_expired(t, self.skew_secs));
        if expired && self.controller.has_refresh_token() {
            debug!(revision, "Access token expired before send, refreshing first");
            match self.controller.refresh_after(revision).await {
                Ok((credential, committed)) => {
                    bearer = Some(credential.access_token);
                    revision = committed;
                }
                Err(e) => {
                    debug!(error = %e, "Pre-send refresh failed");
                    (bearer, revision) = self.store.access_token_with_revision();
                }
            }
        }

        if let Some(bearer) = bearer {
            request.set_bearer(&bearer);
        }
        request.revision = Some(revision);
        next.run(request).await
    }

    fn name(&self) -> &'static str {
        "auth_injector"
    }
}

// ---------------------------------------------------------------------------
// RefreshOnUnauthorized
// ---------------------------------------------------------------------------

/// On a 401 from a non-auth endpoint, refreshes (single-flight) and replays
/// the request once with the new token.
pub struct RefreshOnUnauthorized {
    controller: Arc<dyn SessionController>,
    paths: AuthPaths,
}

#[async_trait]
impl Middleware for RefreshOnUnauthorized {
    async fn handle(&self, request: ApiRequest, next: Next<'_>) -> Result<ApiResponse, RequestError> {
        if self.paths.is_exempt(request.route()) {
            return next.run(request).await;
        }

        let replay = request.clone();
        let original = match next.run(request).await {
            Err(e) if e.is_unauthorized() => e,
            other => return other,
        };

        let observed = replay
            .revision
            .unwrap_or_else(|| self.controller.credential_revision());
        if !self.controller.has_refresh_token() {
            info!(path = %replay.route(), "401 without refresh token, ending session");
            self.controller
                .force_logout(observed, "unauthorized without refresh token")
                .await;
            return Err(original);
        }

        let (credential, revision) = match self.controller.refresh_after(observed).await {
            Ok(refreshed) => refreshed,
            Err(SessionError::Superseded) => {
                debug!(path = %replay.route(), "Session ended while waiting for refresh");
                return Err(original);
            }
            Err(e) => {
                warn!(path = %replay.route(), error = %e, "Refresh after 401 failed");
                return Err(original);
            }
        };

        let mut retry = replay;
        retry.set_bearer(&credential.access_token);
        retry.revision = Some(revision);
        debug!(path = %retry.route(), revision, "Replaying request with refreshed token");

        match next.run(retry).await {
            Err(e) if e.is_unauthorized() => {
                warn!("Refreshed token rejected too, ending session");
                self.controller
                    .force_logout(revision, "refreshed token rejected")
                    .await;
                Err(e)
            }
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "refresh_on_unauthorized"
    }
}

// ---------------------------------------------------------------------------
// ErrorNormalizer
// ---------------------------------------------------------------------------

/// Turns non-2xx responses into [`RequestError`]s and signals
/// [`Navigation::Unauthorized`] on 403.
pub struct ErrorNormalizer {
    navigator: Navigator,
}

impl ErrorNormalizer {
    pub fn new(navigator: Navigator) -> Self {
        Self { navigator }
    }
}

#[async_trait]
impl Middleware for ErrorNormalizer {
    async fn handle(&self, request: ApiRequest, next: Next<'_>) -> Result<ApiResponse, RequestError> {
        let route = request.route().to_string();
        let response = next.run(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let err = RequestError::from_response(response.status, &response.body);
        debug!(status = err.status, kind = %err.kind, path = %route, "Request failed");
        if err.is_forbidden() {
            self.navigator.emit(Navigation::Unauthorized);
        }
        Err(err)
    }

    fn name(&self) -> &'static str {
        "error_normalizer"
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// JSON convenience layer over an [`InterceptionChain`].
#[derive(Clone)]
pub struct ApiClient {
    chain: InterceptionChain,
}

impl ApiClient {
    pub fn new(chain: InterceptionChain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &InterceptionChain {
        &self.chain
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        self.chain.execute(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| RequestError::invalid_body(0, e))?;
        self.send(ApiRequest::post(path, body)).await?.json()
    }

    /// Raw body as text, whatever the content type.
    pub async fn get_text(&self, path: &str) -> Result<String, RequestError> {
        Ok(self.send(ApiRequest::get(path)).await?.text())
    }
}
