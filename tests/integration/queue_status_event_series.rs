//! `spec.md` §8 scenario 2: an event-series action resolves with its
//! response plus the buffered intermediate events, terminator excluded.

use ami::bus::SubscriptionBus;
use ami::config::{AuthMode, ProviderConfig};
use ami::session::{self, SessionState};
use ami::Outcome;
use ami_protocol::actions;
use ami_test_utils::MockAmiServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn handshake(conn: &mut ami_test_utils::AmiConnection) {
    conn.send_greeting("Asterisk Call Manager/9.0.0").await.unwrap();
    let login = conn.read_action().await.unwrap();
    assert_eq!(login.get("action").map(String::as_str), Some("Login"));
    let login_id = login.get("actionid").cloned().unwrap_or_default();
    conn.send_packet(&[("Response", "Success"), ("ActionID", &login_id)]).await.unwrap();
}

#[tokio::test]
async fn queue_status_resolves_with_buffered_events() {
    let server = MockAmiServer::start(|mut conn| async move {
        handshake(&mut conn).await;

        let queue_status = conn.read_action().await.unwrap();
        assert_eq!(queue_status.get("action").map(String::as_str), Some("QueueStatus"));
        let action_id = queue_status.get("actionid").cloned().unwrap_or_default();

        conn.send_packet(&[("Response", "Success"), ("ActionID", &action_id)]).await.unwrap();
        conn.send_packet(&[("Event", "QueueParams"), ("ActionID", &action_id), ("Queue", "support")])
            .await
            .unwrap();
        conn.send_packet(&[("Event", "QueueMember"), ("ActionID", &action_id), ("Location", "SIP/100")])
            .await
            .unwrap();
        conn.send_packet(&[("Event", "QueueStatusComplete"), ("ActionID", &action_id)])
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

    let outcome = handle.submit(actions::queue_status(Some("support")), Duration::from_secs(2)).await;
    let (response, events) = match outcome {
        Outcome::ResponseWithEvents(response, events) => (response, events),
        other => panic!("expected ResponseWithEvents, got {other:?}"),
    };
    assert_eq!(response.status, ami::record::ResponseStatus::Success);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name, "QueueParams");
    assert_eq!(events[1].name, "QueueMember");
}
