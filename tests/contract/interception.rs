//! Requests through the interception chain.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scx_session::net::{ApiRequest, AuthPaths, HttpTransport, InterceptionChain};
use scx_session::store::{KeyValueStore, MemoryStore};
use scx_session::{
    Credential, CredentialStore, ErrorKind, Navigation, Phase, Role, UserProfile,
};

use crate::common::{access_token, bearer, refresh_body, session_for};

/// Store holding a signed-in credential for an admin.
fn signed_in_store(access: &str, refresh: &str) -> CredentialStore {
    let store = CredentialStore::in_memory();
    store.put(&Credential::new(access, refresh), false).unwrap();
    store
        .put_user(&UserProfile {
            id: "7".into(),
            display_name: "ops".into(),
            email: "ops@scx.io".into(),
            roles: [Role::ADMIN].into_iter().collect(),
            active: true,
        })
        .unwrap();
    store
}

async fn mount_suppliers(server: &MockServer, rejected: &str, accepted: &str) {
    Mock::given(method("GET"))
        .and(path("/api/suppliers"))
        .and(header("authorization", bearer(rejected).as_str()))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/suppliers"))
        .and(header("authorization", bearer(accepted).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .mount(server)
        .await;
}

#[test]
fn test_standard_chain_order() {
    let store = Arc::new(CredentialStore::in_memory());
    let transport = HttpTransport::new(reqwest::Client::new(), "http://127.0.0.1:9").unwrap();
    let session = scx_session::Session::new(
        transport.clone(),
        AuthPaths::default(),
        Arc::clone(&store),
        Default::default(),
    );
    let chain = InterceptionChain::standard(
        transport,
        session,
        store,
        Default::default(),
        AuthPaths::default(),
        30,
    );
    assert_eq!(
        chain.layer_names(),
        ["auth_injector", "refresh_on_unauthorized", "error_normalizer"]
    );
}

#[tokio::test]
async fn test_bearer_attached() {
    let server = MockServer::start().await;
    let access = access_token("a1", &["ADMIN"], 3600);
    Mock::given(method("GET"))
        .and(path("/api/products"))
        .and(header("authorization", bearer(&access).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, signed_in_store(&access, "r1"));
    session.restore().await;
    assert_eq!(session.client().get_text("/products").await.unwrap(), "[]");
    session.shutdown();
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    let stale = access_token("old", &["ADMIN"], 3600);
    let fresh = access_token("new", &["ADMIN"], 3600);
    mount_suppliers(&server, &stale, &fresh).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(refresh_body(&fresh, Some("r2")))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, signed_in_store(&stale, "r1"));
    session.restore().await;
    let client = session.client();

    let results = futures::future::join_all(
        (0..5).map(|_| {
            let client = client.clone();
            async move { client.get_text("/suppliers").await }
        }),
    )
    .await;

    for result in results {
        assert_eq!(result.unwrap(), r#"[{"id":1}]"#);
    }
    assert_eq!(session.store().refresh_token().as_deref(), Some("r2"));
    assert_eq!(session.phase(), Phase::Authenticated);
    server.verify().await;
    session.shutdown();
}

#[tokio::test]
async fn test_failed_refresh_is_not_repeated_by_queued_requests() {
    let server = MockServer::start().await;
    let stale = access_token("old", &["ADMIN"], 3600);
    Mock::given(method("GET"))
        .and(path("/api/suppliers"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, signed_in_store(&stale, "r1"));
    session.restore().await;
    let mut nav = session.navigation();
    let client = session.client();

    let results = futures::future::join_all(
        (0..3).map(|_| {
            let client = client.clone();
            async move { client.get_text("/suppliers").await }
        }),
    )
    .await;

    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.status, 401);
        assert_eq!(err.kind, ErrorKind::Authentication);
    }
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(session.store().get().is_none());
    assert_eq!(nav.recv().await.unwrap(), Navigation::Login);
    server.verify().await;
}

#[tokio::test]
async fn test_401_without_refresh_token_logs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/suppliers"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ephemeral = MemoryStore::new();
    ephemeral
        .set("scx_access_token", &access_token("a1", &["ADMIN"], 3600))
        .unwrap();
    let store = CredentialStore::new(Arc::new(ephemeral), Arc::new(MemoryStore::new()));
    let session = session_for(&server, store);
    let mut nav = session.navigation();

    let err = session.client().get_text("/suppliers").await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(!session.store().has_any());
    assert_eq!(nav.recv().await.unwrap(), Navigation::Login);
}

#[tokio::test]
async fn test_replayed_401_forces_logout() {
    let server = MockServer::start().await;
    let stale = access_token("old", &["ADMIN"], 3600);
    let fresh = access_token("new", &["ADMIN"], 3600);
    Mock::given(method("GET"))
        .and(path("/api/suppliers"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body(&fresh, Some("r2"))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, signed_in_store(&stale, "r1"));
    session.restore().await;

    let err = session.client().get_text("/suppliers").await.unwrap_err();
    assert_eq!(err.status, 401);
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(session.store().get().is_none());
    server.verify().await;
}

#[tokio::test]
async fn test_expired_token_refreshed_before_send() {
    let server = MockServer::start().await;
    let expired = access_token("old", &["ADMIN"], -60);
    let fresh = access_token("new", &["ADMIN"], 3600);
    mount_suppliers(&server, &expired, &fresh).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body(&fresh, None)))
        .expect(1)
        .mount(&server)
        .await;

    let store = CredentialStore::in_memory();
    store.put(&Credential::new(&expired, "r1"), false).unwrap();
    let session = session_for(&server, store);

    let body = session.client().get_text("/suppliers").await.unwrap();
    assert_eq!(body, r#"[{"id":1}]"#);
    // the refreshed credential resumes the session
    assert_eq!(session.phase(), Phase::Authenticated);
    assert_eq!(session.current_user().unwrap().email, "ops@scx.io");

    let requests = server.received_requests().await.unwrap();
    let sent_stale = requests
        .iter()
        .filter(|r| r.url.path() == "/api/suppliers")
        .any(|r| r.headers.get("authorization").is_some_and(|v| v == bearer(&expired).as_str()));
    assert!(!sent_stale);
    session.shutdown();
}

#[tokio::test]
async fn test_auth_endpoints_are_exempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let access = access_token("a1", &["ADMIN"], 3600);
    let session = session_for(&server, signed_in_store(&access, "r1"));
    session.restore().await;

    let request = ApiRequest::post("/auth/login", json!({ "email": "x", "password": "y" }));
    let err = session.client().send(request).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(session.phase(), Phase::Authenticated);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.headers.contains_key("authorization")));
    session.shutdown();
}

#[tokio::test]
async fn test_forbidden_signals_unauthorized_without_logout() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/users/3"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "status": 403,
            "message": "Forbidden",
        })))
        .mount(&server)
        .await;

    let access = access_token("a1", &["PRODUCTION"], 3600);
    let session = session_for(&server, signed_in_store(&access, "r1"));
    session.restore().await;
    let mut nav = session.navigation();

    let request = ApiRequest::new(reqwest::Method::DELETE, "/users/3");
    let err = session.client().send(request).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authorization);
    assert_eq!(err.message, "Access denied");
    assert_eq!(nav.recv().await.unwrap(), Navigation::Unauthorized);
    assert!(session.is_authenticated());
    session.shutdown();
}

#[tokio::test]
async fn test_validation_errors_reach_caller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/suppliers"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "timestamp": "2024-05-02T10:00:00",
            "status": 400,
            "message": "Validation failed",
            "path": "/api/suppliers",
            "errors": { "name": "must not be blank" },
        })))
        .mount(&server)
        .await;

    let access = access_token("a1", &["APPROVISIONNEMENT"], 3600);
    let session = session_for(&server, signed_in_store(&access, "r1"));
    session.restore().await;

    let err = session
        .client()
        .post_json::<_, serde_json::Value>("/suppliers", &json!({ "name": "" }))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(err.message, "Validation failed");
    assert_eq!(
        err.field_errors().unwrap().get("name").map(String::as_str),
        Some("must not be blank")
    );
    session.shutdown();
}

#[tokio::test]
async fn test_unreachable_server_is_transport_failure() {
    let access = access_token("a1", &["ADMIN"], 3600);
    let store = Arc::new(signed_in_store(&access, "r1"));
    let transport = HttpTransport::new(reqwest::Client::new(), "http://127.0.0.1:9/api").unwrap();
    let session = scx_session::Session::new(
        transport,
        AuthPaths::default(),
        store,
        Default::default(),
    );
    session.restore().await;

    let err = session.client().get_text("/suppliers").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transport);
    assert_eq!(err.status, 0);
    assert!(session.is_authenticated());
    session.shutdown();
}
