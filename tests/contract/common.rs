//! Shared fixtures for the contract tests.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scx_session::config::SessionConfig;
use scx_session::net::{AuthPaths, HttpTransport};
use scx_session::{CredentialStore, Session};

/// Unsigned token around `claims`. The client never checks signatures.
pub fn make_token(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Access token for user 7 expiring `ttl_secs` from now. `tag` makes tokens
/// with the same lifetime distinguishable.
pub fn access_token(tag: &str, roles: &[&str], ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    make_token(json!({
        "sub": "7",
        "email": "ops@scx.io",
        "roles": roles,
        "iat": now,
        "exp": now + ttl_secs,
        "jti": tag,
    }))
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn session_for(server: &MockServer, store: CredentialStore) -> Arc<Session> {
    session_with_timings(server, store, SessionConfig::default())
}

pub fn session_with_timings(
    server: &MockServer,
    store: CredentialStore,
    timings: SessionConfig,
) -> Arc<Session> {
    let transport = HttpTransport::new(reqwest::Client::new(), &format!("{}/api", server.uri()))
        .expect("mock server uri");
    Session::new(transport, AuthPaths::default(), Arc::new(store), timings)
}

pub fn login_body(access: &str, refresh: &str, roles: &[&str]) -> Value {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "tokenType": "Bearer",
        "expiresIn": 3600,
        "user": {
            "id": 7,
            "fullName": "Ops Lead",
            "email": "ops@scx.io",
            "roles": roles,
            "active": true,
        }
    })
}

pub async fn mount_login(server: &MockServer, access: &str, refresh: &str, roles: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(access, refresh, roles)))
        .mount(server)
        .await;
}

pub fn refresh_body(access: &str, refresh: Option<&str>) -> Value {
    let mut body = json!({
        "accessToken": access,
        "tokenType": "Bearer",
        "expiresIn": 3600,
    });
    if let Some(refresh) = refresh {
        body["refreshToken"] = json!(refresh);
    }
    body
}

/// Poll `check` for up to `attempts * 100ms`.
pub async fn eventually(attempts: usize, check: impl Fn() -> bool) -> bool {
    for _ in 0..attempts {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    check()
}
