//! `spec.md` §8 scenario 5: a `Command` action's `Response: Follows`
//! raw body is captured and attached to the resolved response's
//! `output` field.

use ami::bus::SubscriptionBus;
use ami::config::{AuthMode, ProviderConfig};
use ami::session::{self, SessionState};
use ami::Outcome;
use ami_protocol::actions;
use ami_test_utils::MockAmiServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn command_follows_body_is_captured_as_output() {
    let server = MockAmiServer::start(|mut conn| async move {
        conn.send_greeting("Asterisk Call Manager/9.0.0").await.unwrap();
        let login = conn.read_action().await.unwrap();
        let login_id = login.get("actionid").cloned().unwrap_or_default();
        conn.send_packet(&[("Response", "Success"), ("ActionID", &login_id)]).await.unwrap();

        let command = conn.read_action().await.unwrap();
        assert_eq!(command.get("action").map(String::as_str), Some("Command"));
        let action_id = command.get("actionid").cloned().unwrap_or_default();
        conn.send_follows(Some(&action_id), &["Channel              Location             State   Application", "SIP/100              default@1            Up      Answer"])
            .await
            .unwrap();

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

    let outcome = handle.submit(actions::command("core show channels"), Duration::from_secs(2)).await;
    let response = match outcome {
        Outcome::Response(response) => response,
        other => panic!("expected Response, got {other:?}"),
    };
    let output = response.output.expect("Follows response should carry captured output");
    assert_eq!(
        output,
        "Channel              Location             State   Application\nSIP/100              default@1            Up      Answer\n"
    );
}
