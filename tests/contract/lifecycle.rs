//! Login, restore, refresh and logout.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scx_session::config::SessionConfig;
use scx_session::store::{FileStore, KeyValueStore, MemoryStore};
use scx_session::{CredentialStore, ErrorKind, Navigation, Phase, Role, SessionError};

use crate::common::{
    access_token, bearer, eventually, mount_login, refresh_body, session_for, session_with_timings,
};

fn durable_store(dir: &std::path::Path) -> CredentialStore {
    CredentialStore::new(Arc::new(MemoryStore::new()), Arc::new(FileStore::new(dir)))
}

#[tokio::test]
async fn test_login_publishes_user_and_stores_tokens() {
    let server = MockServer::start().await;
    let access = access_token("a1", &["PRODUCTION"], 3600);
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({
            "email": "ops@scx.io",
            "password": "secret",
            "rememberMe": false,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(crate::common::login_body(&access, "r1", &["PRODUCTION"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, CredentialStore::in_memory());
    let mut states = session.subscribe();

    let user = session.login("ops@scx.io", "secret", false).await.unwrap();
    assert_eq!(user.display_name, "Ops Lead");
    assert!(user.roles.contains(&Role::PRODUCTION));

    assert!(session.is_authenticated());
    assert!(states.has_changed().unwrap());
    assert_eq!(states.borrow_and_update().user.as_ref().unwrap().id, "7");
    assert_eq!(session.store().access_token().as_deref(), Some(access.as_str()));
    assert_eq!(session.store().refresh_token().as_deref(), Some("r1"));
    assert!(!session.store().persist_refresh());
    assert!(session.refresh_scheduled());
    session.shutdown();
}

#[tokio::test]
async fn test_login_rejected_surfaces_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "status": 401,
            "message": "Bad credentials",
        })))
        .mount(&server)
        .await;

    let session = session_for(&server, CredentialStore::in_memory());
    let err = session.login("ops@scx.io", "wrong", true).await.unwrap_err();

    match &err {
        SessionError::Request(e) => {
            assert_eq!(e.kind, ErrorKind::Authentication);
            assert_eq!(e.message, "Invalid email or password");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let state = session.state();
    assert_eq!(state.phase, Phase::Unauthenticated);
    assert_eq!(state.error.as_deref(), Some("Invalid email or password"));
    assert!(!session.store().has_any());
}

#[tokio::test]
async fn test_login_accepts_flat_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": access_token("a1", &[], 3600),
            "refreshToken": "r1",
            "userId": 42,
            "email": "driver@scx.io",
            "role": "ROLE_LIVRAISON",
        })))
        .mount(&server)
        .await;

    let session = session_for(&server, CredentialStore::in_memory());
    let user = session.login("driver@scx.io", "pw", false).await.unwrap();
    assert_eq!(user.id, "42");
    assert_eq!(user.display_name, "driver");
    assert!(user.roles.contains(&Role::LIVRAISON));
    assert_eq!(session.store().get_user(), Some(user));
    session.shutdown();
}

#[tokio::test]
async fn test_remembered_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_login(&server, &access_token("a1", &["ADMIN"], 3600), "r1", &["ADMIN"]).await;
    let fresh = access_token("a2", &["ADMIN"], 3600);
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body(&fresh, Some("r2"))))
        .expect(1)
        .mount(&server)
        .await;

    {
        let session = session_for(&server, durable_store(dir.path()));
        session.login("ops@scx.io", "secret", true).await.unwrap();
        session.shutdown();
    }

    // new process: the ephemeral tier starts empty
    let session = session_for(&server, durable_store(dir.path()));
    let state = session.restore().await;

    assert_eq!(state.phase, Phase::Authenticated);
    assert_eq!(state.user.unwrap().email, "ops@scx.io");
    assert_eq!(session.store().access_token().as_deref(), Some(fresh.as_str()));
    assert_eq!(session.store().refresh_token().as_deref(), Some("r2"));
    assert!(session.store().persist_refresh());

    let durable = FileStore::new(dir.path());
    assert_eq!(durable.get("scx_refresh_token").unwrap().as_deref(), Some("r2"));
    session.shutdown();
}

#[tokio::test]
async fn test_session_not_remembered_is_gone_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_login(&server, &access_token("a1", &["ADMIN"], 3600), "r1", &["ADMIN"]).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    {
        let session = session_for(&server, durable_store(dir.path()));
        session.login("ops@scx.io", "secret", false).await.unwrap();
        session.shutdown();
    }

    let session = session_for(&server, durable_store(dir.path()));
    let state = session.restore().await;
    assert_eq!(state.phase, Phase::Unauthenticated);
    assert!(session.store().get().is_none());
}

#[tokio::test]
async fn test_refresh_without_rotation_keeps_token_and_tier() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_login(&server, &access_token("a1", &["ADMIN"], 3600), "r1", &["ADMIN"]).await;
    let fresh = access_token("a2", &["ADMIN"], 3600);
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body(&fresh, None)))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, durable_store(dir.path()));
    session.login("ops@scx.io", "secret", true).await.unwrap();
    let before = session.store().revision();

    let credential = session.refresh().await.unwrap();
    assert_eq!(credential.access_token, fresh);
    assert_eq!(credential.refresh_token, "r1");
    assert_eq!(session.store().revision(), before + 1);
    assert!(session.store().persist_refresh());
    assert_eq!(session.phase(), Phase::Authenticated);
    session.shutdown();
}

#[tokio::test]
async fn test_rejected_refresh_forces_logout() {
    let server = MockServer::start().await;
    mount_login(&server, &access_token("a1", &["ADMIN"], 3600), "r1", &["ADMIN"]).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, CredentialStore::in_memory());
    session.login("ops@scx.io", "secret", true).await.unwrap();
    let mut nav = session.navigation();

    let err = session.refresh().await.unwrap_err();
    assert!(matches!(err, SessionError::RefreshRejected(_)));
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(session.store().get().is_none());
    assert!(!session.refresh_scheduled());
    assert_eq!(nav.recv().await.unwrap(), Navigation::Login);
}

#[tokio::test]
async fn test_logout_clears_both_tiers_even_when_server_fails() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let access = access_token("a1", &["ADMIN"], 3600);
    mount_login(&server, &access, "r1", &["ADMIN"]).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .and(header("authorization", bearer(&access).as_str()))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, durable_store(dir.path()));
    session.login("ops@scx.io", "secret", true).await.unwrap();
    let mut nav = session.navigation();

    session.logout().await;

    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(session.store().get().is_none());
    assert!(!session.store().has_any());
    assert!(!FileStore::new(dir.path()).contains("scx_refresh_token").unwrap());
    assert!(!session.refresh_scheduled());
    assert_eq!(nav.recv().await.unwrap(), Navigation::Login);
}

#[tokio::test]
async fn test_login_replaces_existing_session() {
    let server = MockServer::start().await;
    mount_login(&server, &access_token("a1", &["ADMIN"], 3600), "r1", &["ADMIN"]).await;

    let session = session_for(&server, CredentialStore::in_memory());
    session.login("ops@scx.io", "secret", true).await.unwrap();
    let first = session.store().revision();

    session.login("ops@scx.io", "secret", false).await.unwrap();
    assert!(session.store().revision() > first);
    assert_eq!(session.phase(), Phase::Authenticated);
    assert!(!session.store().persist_refresh());
    session.shutdown();
}

#[tokio::test]
async fn test_proactive_refresh_fires_before_expiry() {
    let server = MockServer::start().await;
    let short = access_token("a1", &["ADMIN"], 122);
    let fresh = access_token("a2", &["ADMIN"], 3600);
    mount_login(&server, &short, "r1", &["ADMIN"]).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_body(&fresh, Some("r2"))))
        .expect(1)
        .mount(&server)
        .await;

    let timings = SessionConfig {
        refresh_lead_secs: 120,
        ..SessionConfig::default()
    };
    let session = session_with_timings(&server, CredentialStore::in_memory(), timings);
    session.login("ops@scx.io", "secret", false).await.unwrap();
    assert!(session.refresh_scheduled());

    let refreshed = eventually(40, || {
        session.store().access_token().as_deref() == Some(fresh.as_str())
    })
    .await;
    assert!(refreshed, "proactive refresh did not run");
    assert_eq!(session.phase(), Phase::Authenticated);
    // re-armed for the new token
    assert!(session.refresh_scheduled());
    session.shutdown();
}

#[tokio::test]
async fn test_logout_cancels_proactive_refresh() {
    let server = MockServer::start().await;
    mount_login(&server, &access_token("a1", &["ADMIN"], 122), "r1", &["ADMIN"]).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let timings = SessionConfig {
        refresh_lead_secs: 120,
        ..SessionConfig::default()
    };
    let session = session_with_timings(&server, CredentialStore::in_memory(), timings);
    session.login("ops@scx.io", "secret", false).await.unwrap();
    session.logout().await;

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(session.phase(), Phase::Unauthenticated);
}

#[tokio::test]
async fn test_fetch_current_user_updates_state_and_cache() {
    let server = MockServer::start().await;
    let access = access_token("a1", &["ADMIN"], 3600);
    mount_login(&server, &access, "r1", &["ADMIN"]).await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .and(header("authorization", bearer(&access).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "7",
            "fullName": "Operations Lead",
            "email": "ops@scx.io",
            "roles": ["ADMIN", "PRODUCTION"],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, CredentialStore::in_memory());
    session.login("ops@scx.io", "secret", false).await.unwrap();

    let user = session.fetch_current_user().await.unwrap();
    assert_eq!(user.display_name, "Operations Lead");
    assert_eq!(session.current_user(), Some(user.clone()));
    assert_eq!(session.store().get_user(), Some(user));
    session.shutdown();
}
