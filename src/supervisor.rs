//! C8: multi-provider orchestration, reconnection, and shared subscriptions.

use crate::bus::{EventFilter, SubscriptionBus};
use crate::config::{AuthMode, ProviderConfig, RetryPolicy, RuntimeConfig};
use crate::error::AmiError;
use crate::health::{self, HealthReport};
use crate::provider::{Provider, ProviderSnapshot};
use crate::record::Event;
use crate::session::{SessionHandle, SessionState};
use ami_protocol::ActionCatalog;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One event delivered through a [`SubscriptionHandle`]: either a
/// decoded AMI event from some provider, or that provider's session
/// going away (`spec.md` §4.5 Teardown: "all subscribers are notified
/// via a `Disconnected(reason)` signal").
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Event { provider: String, event: Event },
    Disconnected { provider: String, reason: String },
}

/// A live subscription across every provider the supervisor currently
/// owns. Dropping it unsubscribes from all of them.
pub struct SubscriptionHandle {
    rx: mpsc::Receiver<ManagerEvent>,
    forwarders: Vec<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub async fn recv(&mut self) -> Option<ManagerEvent> {
        self.rx.recv().await
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        for handle in &self.forwarders {
            handle.abort();
        }
    }
}

/// One configured provider plus the machinery the supervisor needs to
/// keep it connected across reconnects: a subscription bus that
/// outlives any individual session (`spec.md` §3's "subscriptions
/// outlive sessions" invariant) and a per-provider shutdown signal so
/// `Reload` can dispose a single removed provider without tearing down
/// the others.
struct ProviderEntry {
    provider: Arc<Provider>,
    bus: SubscriptionBus,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Broadcasts this provider's session-end reason to every current
    /// `Supervisor::subscribe` forwarder, independent of the AMI event
    /// bus — `spec.md` §4.5 Teardown's "all subscribers are notified via
    /// a `Disconnected(reason)` signal" is a distinct channel from
    /// decoded AMI events, not a synthetic event on `bus`.
    disconnect_tx: tokio::sync::broadcast::Sender<String>,
}

fn make_entry(config: ProviderConfig) -> Arc<ProviderEntry> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (disconnect_tx, _) = tokio::sync::broadcast::channel(16);
    Arc::new(ProviderEntry {
        provider: Arc::new(Provider::new(config)),
        bus: SubscriptionBus::new(256),
        shutdown_tx,
        shutdown_rx,
        task: Mutex::new(None),
        disconnect_tx,
    })
}

/// Multi-provider orchestrator (`spec.md` §4.8). Owns one reconnect loop
/// per provider and the shared subscription set that survives every
/// provider's successive sessions.
pub struct Supervisor {
    entries: RwLock<Vec<Arc<ProviderEntry>>>,
    retry: RwLock<RetryPolicy>,
    health_config: RwLock<crate::config::HealthConfig>,
    catalog: Arc<dyn ActionCatalog>,
}

impl Supervisor {
    pub fn new(config: RuntimeConfig, catalog: Arc<dyn ActionCatalog>) -> Self {
        let entries = config.providers.into_iter().map(make_entry).collect();
        Supervisor {
            entries: RwLock::new(entries),
            retry: RwLock::new(config.retry),
            health_config: RwLock::new(config.health),
            catalog,
        }
    }

    fn snapshot_entries(&self) -> Vec<Arc<ProviderEntry>> {
        self.entries.read().expect("supervisor lock poisoned").clone()
    }

    /// Launches one reconnect loop per configured provider. Idempotent
    /// per provider: an entry that already has a running task is left
    /// alone (used by [`Self::reload`] to avoid disrupting providers
    /// that are unchanged across a reload).
    pub fn start(&self) {
        let retry = self.retry.read().expect("supervisor lock poisoned").clone();
        for entry in self.snapshot_entries() {
            self.spawn_if_idle(entry, retry.clone());
        }
    }

    fn spawn_if_idle(&self, entry: Arc<ProviderEntry>, retry: RetryPolicy) {
        let mut task_slot = entry.task.lock().expect("supervisor lock poisoned");
        if task_slot.is_some() {
            return;
        }
        let catalog = self.catalog.clone();
        let entry_for_task = entry.clone();
        *task_slot = Some(tokio::spawn(async move {
            reconnect_loop(entry_for_task, catalog, retry).await;
        }));
    }

    /// Signals every provider to stop and waits (bounded by a grace
    /// timeout) for every reconnect loop to acknowledge. No subscriber
    /// forwarding task is aborted here — subscribers keep observing
    /// `Disconnected` signals for in-flight teardown, and are only cut
    /// off when their [`SubscriptionHandle`] is dropped.
    pub async fn stop(&self) {
        let entries = self.snapshot_entries();
        for entry in &entries {
            let _ = entry.shutdown_tx.send(true);
        }
        for entry in &entries {
            let task = entry.task.lock().expect("supervisor lock poisoned").take();
            if let Some(task) = task {
                if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                    warn!(provider = %entry.provider.config.title, "reconnect loop did not stop within grace period");
                }
            }
        }
    }

    /// Registers a handler shared across every provider's current and
    /// future sessions (`spec.md` §4.8 `Subscribe`). The returned handle
    /// aggregates every provider's bus into one stream tagged by
    /// provider title.
    pub fn subscribe(&self, filter: EventFilter) -> SubscriptionHandle {
        let (tx, rx) = mpsc::channel(1024);
        let mut forwarders = Vec::new();
        for entry in self.snapshot_entries() {
            let mut sub = entry.bus.subscribe_filtered(filter.clone());
            let mut disconnects = entry.disconnect_tx.subscribe();
            let title = entry.provider.config.title.clone();
            let tx = tx.clone();
            forwarders.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = sub.events.recv() => {
                            let Some(event) = event else { break };
                            if tx.send(ManagerEvent::Event { provider: title.clone(), event }).await.is_err() {
                                break;
                            }
                        }
                        reason = disconnects.recv() => {
                            match reason {
                                Ok(reason) => {
                                    if tx.send(ManagerEvent::Disconnected { provider: title.clone(), reason }).await.is_err() {
                                        break;
                                    }
                                }
                                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                            }
                        }
                    }
                }
            }));
        }
        SubscriptionHandle { rx, forwarders }
    }

    /// Grades the current provider set against the configured health
    /// threshold (`spec.md` §4.9). `extended` is merged into the report
    /// verbatim.
    pub fn check_health(&self, extended: serde_json::Value) -> HealthReport {
        let snapshots: Vec<ProviderSnapshot> =
            self.snapshot_entries().iter().map(|e| e.provider.snapshot()).collect();
        let health_config = self.health_config.read().expect("supervisor lock poisoned").clone();
        health::evaluate(&snapshots, &health_config, extended)
    }

    /// `Stop` ∘ brief pause ∘ re-`Start` with a resolved diff: providers
    /// matching an existing one by [`ProviderConfig`] equality are
    /// reused (their subscription bus and running reconnect loop are
    /// left untouched — they never stopped), removed providers are
    /// disposed, new ones are added (`spec.md` §4.8 `Reload`).
    ///
    /// Per `spec.md` §9 Open Questions, this implementation's choice is
    /// that subscriptions attached only to a *removed* provider's bus do
    /// not survive the reload; callers observe that provider's
    /// `Disconnected` signal and must resubscribe if a replacement
    /// provider with the same title is added later.
    pub async fn reload(&self, new_config: RuntimeConfig) {
        let old_entries = self.snapshot_entries();

        let mut kept = Vec::new();
        let mut to_add = Vec::new();
        for cfg in new_config.providers {
            match old_entries.iter().find(|e| e.provider.config == cfg) {
                Some(existing) => kept.push(existing.clone()),
                None => to_add.push(cfg),
            }
        }

        for entry in &old_entries {
            let still_present = kept.iter().any(|k| Arc::ptr_eq(k, entry));
            if !still_present {
                let _ = entry.shutdown_tx.send(true);
                let task = entry.task.lock().expect("supervisor lock poisoned").take();
                if let Some(task) = task {
                    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
                }
            }
        }

        let mut new_entries = kept;
        for cfg in to_add {
            new_entries.push(make_entry(cfg));
        }

        *self.retry.write().expect("supervisor lock poisoned") = new_config.retry;
        *self.health_config.write().expect("supervisor lock poisoned") = new_config.health;
        *self.entries.write().expect("supervisor lock poisoned") = new_entries;

        self.start();
    }
}

/// Drives one provider's connect/retry cycle exactly per `spec.md`
/// §4.8's pseudocode.
async fn reconnect_loop(entry: Arc<ProviderEntry>, catalog: Arc<dyn ActionCatalog>, retry: RetryPolicy) {
    let mut attempt: u32 = 1;
    let mut delay = retry.initial_retry_delay;
    let mut tried_once = false;

    loop {
        if *entry.shutdown_rx.borrow() {
            break;
        }
        if tried_once && !retry.enable_initial_retry {
            break;
        }
        tried_once = true;

        let session_shutdown = entry.shutdown_rx.clone();
        let connect_result = entry
            .provider
            .connect(catalog.clone(), entry.bus.clone(), session_shutdown)
            .await;

        match connect_result {
            Ok(handle) => {
                info!(provider = %entry.provider.config.title, "provider connected");
                attempt = 1;
                delay = retry.initial_retry_delay;

                let reason = wait_for_session_end(&entry, &handle).await;
                entry.provider.mark_reconnecting();
                if let Some(reason) = reason {
                    entry.provider.record_disconnect(&reason);
                    let _ = entry.disconnect_tx.send(reason);
                }

                if *entry.shutdown_rx.borrow() {
                    break;
                }
            }
            Err(AmiError::AuthenticationFailed(reason)) if retry.stop_on_authentication_failure => {
                warn!(provider = %entry.provider.config.title, %reason, "authentication failed, giving up");
                break;
            }
            Err(e) => {
                warn!(provider = %entry.provider.config.title, error = %e, "connect attempt failed");
                if !retry.enable_initial_retry {
                    break;
                }
                if sleep_or_shutdown(&entry, delay).await {
                    break;
                }
                delay = (delay + retry.delay_increment).min(retry.max_delay);
                attempt += 1;
                if retry.max_attempts > 0 && attempt > retry.max_attempts {
                    break;
                }
            }
        }
    }

    entry.provider.disconnect();
}

/// Waits until the session's state reaches `Closed`/`Failed`, or the
/// provider's own shutdown fires. Returns the close reason when the
/// session actually ended (`None` if the wait ended only because of
/// shutdown — the caller already knows why in that case).
async fn wait_for_session_end(entry: &ProviderEntry, handle: &SessionHandle) -> Option<String> {
    let mut state_rx = handle.state_changes();
    let mut shutdown_rx = entry.shutdown_rx.clone();
    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return None;
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Some("session task ended unexpectedly".to_owned());
                }
                match &*state_rx.borrow() {
                    SessionState::Closed => return Some("session closed".to_owned()),
                    SessionState::Failed(reason) => return Some(reason.clone()),
                    _ => {}
                }
            }
        }
    }
}

/// Sleeps `delay`, returning `true` if shutdown fired first.
async fn sleep_or_shutdown(entry: &ProviderEntry, delay: Duration) -> bool {
    let mut shutdown_rx = entry.shutdown_rx.clone();
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}
