//! Route gating after a real sign-in.

use scx_session::config::GateConfig;
use scx_session::{AccessGate, CredentialStore, GateOutcome, Navigation};
use wiremock::MockServer;

use crate::common::{access_token, mount_login, session_for};

#[tokio::test]
async fn test_gate_follows_session() {
    let server = MockServer::start().await;
    mount_login(
        &server,
        &access_token("a1", &["PRODUCTION"], 3600),
        "r1",
        &["PRODUCTION"],
    )
    .await;

    let session = session_for(&server, CredentialStore::in_memory());
    let gate = AccessGate::from_config(session.clone(), &GateConfig::default());
    let mut nav = session.navigation();

    assert_eq!(gate.authorize("/production/orders"), GateOutcome::Login);
    assert_eq!(nav.recv().await.unwrap(), Navigation::Login);

    session.login("ops@scx.io", "secret", false).await.unwrap();
    assert_eq!(gate.authorize("/production/orders"), GateOutcome::Allow);
    assert_eq!(gate.authorize("/procurement"), GateOutcome::Unauthorized);
    assert_eq!(nav.recv().await.unwrap(), Navigation::Unauthorized);

    assert_eq!(gate.land(), Navigation::Home("/production/dashboard".into()));
    assert_eq!(
        nav.recv().await.unwrap(),
        Navigation::Home("/production/dashboard".into())
    );

    session.logout().await;
    assert_eq!(nav.recv().await.unwrap(), Navigation::Login);
    assert_eq!(gate.authorize("/production/orders"), GateOutcome::Login);
}

#[tokio::test]
async fn test_admin_lands_on_admin_dashboard() {
    let server = MockServer::start().await;
    mount_login(
        &server,
        &access_token("a1", &["PRODUCTION", "ADMIN"], 3600),
        "r1",
        &["PRODUCTION", "ADMIN"],
    )
    .await;

    let session = session_for(&server, CredentialStore::in_memory());
    session.login("ops@scx.io", "secret", false).await.unwrap();
    let gate = AccessGate::from_config(session.clone(), &GateConfig::default());

    assert_eq!(gate.home(), "/admin/dashboard");
    for path in ["/procurement", "/production", "/delivery", "/admin/users"] {
        assert!(gate.authorize(path).is_allowed(), "{path}");
    }
    session.shutdown();
}
