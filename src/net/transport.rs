//! Raw HTTP exchange with the backend.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::error::RequestError;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("scx-session/", env!("CARGO_PKG_VERSION"));

/// An outbound request, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the base URL, e.g. `/suppliers?page=0`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Credential revision of the bearer token attached to this request.
    pub revision: Option<u64>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            revision: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path without query string or fragment.
    pub fn route(&self) -> &str {
        self.path
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
    }

    /// Replace the `Authorization` header with a bearer token.
    pub fn set_bearer(&mut self, token: &str) {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(e) => warn!(error = %e, "Access token is not a valid header value, sending without it"),
        }
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }
}

/// A received response, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.body).map_err(|e| RequestError::invalid_body(self.status, e))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends [`ApiRequest`]s against a base URL. Cheap to clone.
///
/// Only failures to obtain a response at all are errors here (status 0).
/// Any HTTP status comes back as an [`ApiResponse`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` with the given client.
    pub fn new(client: Client, base_url: &str) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(base_url)?;
        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Create a transport from the `[api]` config section.
    pub fn from_config(config: &ApiConfig) -> Result<Self, url::ParseError> {
        Self::new(
            build_client(config.connect_timeout(), config.request_timeout()),
            &config.base_url,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path below the base URL.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, RequestError> {
        let url = self.url_for(&request.path);
        debug!(method = %request.method, path = %request.route(), "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(path = %request.route(), "Request timed out");
            }
            RequestError::transport(e)
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(RequestError::transport)?
            .to_vec();

        debug!(status, path = %request.route(), "Response received");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Build the reqwest client, falling back to defaults if the platform
/// rejects the custom configuration.
fn build_client(connect_timeout: Duration, request_timeout: Duration) -> Client {
    match Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to build HTTP client with custom config: {}; using defaults", e);
            Client::default()
        }
    }
}
