//! `spec.md` §8 scenario 3: an event-series action whose terminator
//! never arrives resolves as `TimedOut` once its deadline elapses, and
//! the correlator's table entry is cleaned up.

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
async fn originate_without_a_terminator_times_out() {
    let server = MockAmiServer::start(|mut conn| async move {
        conn.send_greeting("Asterisk Call Manager/9.0.0").await.unwrap();
        let login = conn.read_action().await.unwrap();
        let login_id = login.get("actionid").cloned().unwrap_or_default();
        conn.send_packet(&[("Response", "Success"), ("ActionID", &login_id)]).await.unwrap();

        let originate = conn.read_action().await.unwrap();
        assert_eq!(originate.get("action").map(String::as_str), Some("Originate"));
        let action_id = originate.get("actionid").cloned().unwrap_or_default();
        // Acknowledge the call but never send the OriginateResponse terminator.
        conn.send_packet(&[("Response", "Success"), ("ActionID", &action_id)]).await.unwrap();

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

    let outcome = handle
        .submit(
            actions::originate("SIP/100", "default", "s", "1", Some(1000), &[]),
            Duration::from_millis(100),
        )
        .await;
    assert!(matches!(outcome, Outcome::TimedOut));
}
