//! `spec.md` §8 scenario 4: the peer disconnects while an action is in
//! flight. The action resolves `Disconnected` and the session lands in
//! `Failed`, never `Closed` (that sink is reserved for a requested
//! shutdown).

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
async fn peer_disconnect_fails_the_in_flight_action_and_the_session() {
    let server = MockAmiServer::start(|mut conn| async move {
        conn.send_greeting("Asterisk Call Manager/9.0.0").await.unwrap();
        let login = conn.read_action().await.unwrap();
        let login_id = login.get("actionid").cloned().unwrap_or_default();
        conn.send_packet(&[("Response", "Success"), ("ActionID", &login_id)]).await.unwrap();

        // Read the Ping the client submits, then drop the connection
        // without ever answering it.
        let _ping = conn.read_action().await;
        conn.close().await.unwrap();
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

    let mut state_changes = handle.state_changes();
    let outcome = handle.submit(actions::ping(), Duration::from_secs(5)).await;
    assert!(matches!(outcome, Outcome::Disconnected(_)));

    loop {
        state_changes.changed().await.unwrap();
        if matches!(*state_changes.borrow(), SessionState::Failed(_)) {
            break;
        }
    }
}
