//! `spec.md` §8 scenario 6: an `Originate` action carrying repeated
//! `Variable:` entries puts every one of them on the wire, in order,
//! without merging duplicates into a single line.

use ami::bus::SubscriptionBus;
use ami::config::{AuthMode, ProviderConfig};
use ami::session::{self, SessionState};
use ami_protocol::actions;
use ami_test_utils::MockAmiServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[tokio::test]
async fn originate_preserves_every_repeated_variable_on_the_wire() {
    let (captured_tx, mut captured_rx) = mpsc::channel(1);

    let server = MockAmiServer::start(move |mut conn| {
        let captured_tx = captured_tx.clone();
        async move {
            conn.send_greeting("Asterisk Call Manager/9.0.0").await.unwrap();
            let login = conn.read_action().await.unwrap();
            let login_id = login.get("actionid").cloned().unwrap_or_default();
            conn.send_packet(&[("Response", "Success"), ("ActionID", &login_id)]).await.unwrap();

            let originate = conn.read_action_multi().await.unwrap();
            let action_id = originate
                .iter()
                .find(|(k, _)| k == "actionid")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            let _ = captured_tx.send(originate).await;

            conn.send_packet(&[("Response", "Success"), ("ActionID", &action_id)]).await.unwrap();
            conn.send_packet(&[("Event", "OriginateResponse"), ("ActionID", &action_id)]).await.unwrap();

            let _ = conn.read_action().await;
        }
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

    let variables = vec![
        ("A".to_owned(), "1".to_owned()),
        ("B".to_owned(), "2".to_owned()),
        ("A".to_owned(), "3".to_owned()),
    ];
    let _ = handle
        .submit(
            actions::originate("SIP/100", "default", "s", "1", None, &variables),
            Duration::from_secs(2),
        )
        .await;

    let fields = captured_rx.recv().await.expect("server should have captured the Originate action");
    let variable_lines: Vec<&str> = fields
        .iter()
        .filter(|(k, _)| k == "variable")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(variable_lines, vec!["A=1", "B=2", "A=3"]);
}
