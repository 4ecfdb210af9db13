//! Calls to the `/auth/*` endpoints.
//!
//! These bypass the interception chain: login and refresh must never carry
//! or trigger a refresh of the credential they are obtaining.

use reqwest::Method;
use tracing::{debug, info};

use super::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::config::ApiConfig;
use crate::error::{ErrorKind, RequestError};
use crate::models::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};

/// Endpoint paths of the authentication API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPaths {
    pub login: String,
    pub refresh: String,
    pub logout: String,
    pub me: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

impl AuthPaths {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            login: config.login_path.clone(),
            refresh: config.refresh_path.clone(),
            logout: config.logout_path.clone(),
            me: config.me_path.clone(),
        }
    }

    /// Requests that must never carry a bearer token or trigger a refresh.
    pub fn is_exempt(&self, route: &str) -> bool {
        route == self.login || route == self.refresh
    }
}

/// Client for login, refresh and logout.
#[derive(Debug, Clone)]
pub struct AuthApi {
    transport: HttpTransport,
    paths: AuthPaths,
}

impl AuthApi {
    pub fn new(transport: HttpTransport, paths: AuthPaths) -> Self {
        Self { transport, paths }
    }

    pub fn paths(&self) -> &AuthPaths {
        &self.paths
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    /// `POST /auth/login`.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, RequestError> {
        let body = serde_json::to_value(request).map_err(|e| RequestError::invalid_body(0, e))?;
        let response = self
            .transport
            .send(&ApiRequest::new(Method::POST, &self.paths.login).with_body(body))
            .await?;

        if response.status == 401 {
            let mut err = RequestError::from_response(401, &response.body);
            err.message = "Invalid email or password".to_string();
            return Err(err);
        }
        let login: LoginResponse = success(response)?.json()?;
        info!(email = %request.email, "Login accepted");
        Ok(login)
    }

    /// `POST /auth/refresh`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RequestError> {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: refresh_token.to_string(),
        })
        .map_err(|e| RequestError::invalid_body(0, e))?;
        let response = self
            .transport
            .send(&ApiRequest::new(Method::POST, &self.paths.refresh).with_body(body))
            .await?;
        let refreshed: RefreshResponse = success(response)?.json()?;
        debug!(rotated = refreshed.refresh_token.is_some(), "Refresh accepted");
        Ok(refreshed)
    }

    /// `POST /auth/logout`. Callers treat failures as non-fatal.
    pub async fn logout(
        &self,
        refresh_token: &str,
        access_token: Option<&str>,
    ) -> Result<(), RequestError> {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: refresh_token.to_string(),
        })
        .map_err(|e| RequestError::invalid_body(0, e))?;
        let mut request = ApiRequest::new(Method::POST, &self.paths.logout).with_body(body);
        if let Some(token) = access_token {
            request.set_bearer(token);
        }
        success(self.transport.send(&request).await?)?;
        Ok(())
    }
}

fn success(response: ApiResponse) -> Result<ApiResponse, RequestError> {
    if response.is_success() {
        Ok(response)
    } else {
        let err = RequestError::from_response(response.status, &response.body);
        debug!(status = err.status, kind = %err.kind, "Auth endpoint rejected request");
        Err(err)
    }
}

impl AuthApi {
    /// Whether a failure means the server refused the credential, as opposed
    /// to being unreachable or broken.
    pub fn is_rejection(err: &RequestError) -> bool {
        matches!(
            err.kind,
            ErrorKind::Authentication | ErrorKind::Authorization | ErrorKind::Validation
        )
    }
}
