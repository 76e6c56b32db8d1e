//! `spec.md` §8 scenario 1: MD5 challenge/response login succeeds and
//! the session reaches `Online`.

use ami::bus::SubscriptionBus;
use ami::config::{AuthMode, ProviderConfig};
use ami::session::{self, SessionState};
use ami_test_utils::{md5_response, MockAmiServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn md5_challenge_response_login_succeeds() {
    let server = MockAmiServer::start(|mut conn| async move {
        conn.send_greeting("Asterisk Call Manager/9.0.0").await.unwrap();

        let challenge = conn.read_action().await.unwrap();
        assert_eq!(challenge.get("action").map(String::as_str), Some("Challenge"));
        let challenge_id = challenge.get("actionid").cloned().unwrap_or_default();
        conn.send_packet(&[
            ("Response", "Success"),
            ("ActionID", &challenge_id),
            ("Challenge", "112233445566"),
        ])
        .await
        .unwrap();

        let login = conn.read_action().await.unwrap();
        assert_eq!(login.get("action").map(String::as_str), Some("Login"));
        let expected_key = md5_response("112233445566", "s3cret");
        assert_eq!(login.get("key").map(String::as_str), Some(expected_key.as_str()));
        let login_id = login.get("actionid").cloned().unwrap_or_default();
        conn.send_packet(&[
            ("Response", "Success"),
            ("ActionID", &login_id),
            ("Message", "Authentication accepted"),
        ])
        .await
        .unwrap();

        // Keep the connection alive so the session's steady-state loop
        // has a peer to read from.
        let _ = conn.read_action().await;
    })
    .await
    .unwrap();

    let config = ProviderConfig {
        title: "primary".to_owned(),
        address: "127.0.0.1".to_owned(),
        port: server.local_addr().port(),
        username: "admin".to_owned(),
        secret: "s3cret".to_owned(),
        use_tls: false,
        auth_mode: AuthMode::Challenge,
        event_mask: "on".to_owned(),
        keep_alive_interval: None,
        default_action_timeout: Duration::from_secs(5),
    };
    let catalog = Arc::new(ami_protocol::default_catalog());
    let bus = SubscriptionBus::new(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = session::connect(&config, catalog, bus, shutdown_rx).await.unwrap();
    assert_eq!(handle.state(), SessionState::Online);
}
