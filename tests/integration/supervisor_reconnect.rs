//! `spec.md` §4.8: a provider whose first connection attempt is
//! rejected is retried automatically, and the supervisor's health
//! report reflects the provider once the retry succeeds. The
//! subscription established before the reconnect keeps receiving
//! events afterward, without resubscribing.

use ami::bus::EventFilter;
use ami::config::{AuthMode, HealthConfig, ProviderConfig, RetryPolicy, RuntimeConfig};
use ami::supervisor::{ManagerEvent, Supervisor};
use ami_test_utils::MockAmiServer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn provider_reconnects_after_a_rejected_first_attempt() {
    let attempt = Arc::new(AtomicUsize::new(0));

    let server = MockAmiServer::start(move |mut conn| {
        let attempt = attempt.clone();
        async move {
            let this_attempt = attempt.fetch_add(1, Ordering::SeqCst);
            if this_attempt == 0 {
                // Simulate a rejected first attempt: close before the
                // greeting is even sent.
                conn.close().await.ok();
                return;
            }

            conn.send_greeting("Asterisk Call Manager/9.0.0").await.unwrap();
            let login = conn.read_action().await.unwrap();
            let login_id = login.get("actionid").cloned().unwrap_or_default();
            conn.send_packet(&[("Response", "Success"), ("ActionID", &login_id)]).await.unwrap();

            conn.send_packet(&[("Event", "PeerStatus"), ("Peer", "SIP/100"), ("PeerStatus", "Registered")])
                .await
                .unwrap();

            let _ = conn.read_action().await;
        }
    })
    .await
    .unwrap();

    let provider_config = ProviderConfig {
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

    let config = RuntimeConfig {
        providers: vec![provider_config],
        retry: RetryPolicy {
            enable_initial_retry: true,
            initial_retry_delay: Duration::from_millis(10),
            delay_increment: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: 5,
            stop_on_authentication_failure: true,
        },
        health: HealthConfig::default(),
    };

    let supervisor = Arc::new(Supervisor::new(config, Arc::new(ami_protocol::default_catalog())));
    let mut subscription = supervisor.subscribe(EventFilter::All);
    supervisor.start();

    let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("an event should arrive once the retried connection succeeds")
        .expect("subscription should still be live");

    match event {
        ManagerEvent::Event { provider, event } => {
            assert_eq!(provider, "primary");
            assert_eq!(event.name, "PeerStatus");
        }
        other => panic!("expected a PeerStatus event, got {other:?}"),
    }

    let report = supervisor.check_health(serde_json::Value::Null);
    assert_eq!(report.connected_providers, 1);

    supervisor.stop().await;
}
