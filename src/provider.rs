//! C7: a named, configured endpoint to one Asterisk server.
//!
//! A [`Provider`] is a thin wrapper around [`ProviderConfig`] plus the
//! bookkeeping the supervisor's reconnect loop and health evaluator need:
//! the current session handle (if connected), the last connect error, and
//! the timestamp of the last successful connection.

use crate::bus::SubscriptionBus;
use crate::config::{AuthMode, ProviderConfig};
use crate::error::AmiError;
use crate::session::{self, SessionHandle, SessionState};
use ami_protocol::ActionCatalog;
use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime};
use tokio::sync::watch;

/// A provider's lifecycle, mirroring `spec.md` §3: `Idle → Connecting →
/// Connected(session) → Reconnecting → Stopped`. Collapsed here to a plain
/// enum without a transient `Connecting` variant — the supervisor's
/// reconnect loop (`spec.md` §4.8) is what's "connecting"; the provider
/// itself only ever observes "not yet connected" vs. "connected" vs.
/// "told to stop".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderState {
    Idle,
    Connected,
    Reconnecting,
    Stopped,
}

/// A point-in-time snapshot of a provider, used by [`crate::health`] and
/// by callers that want to inspect status without holding a lock.
#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub title: String,
    pub address: String,
    pub port: u16,
    pub state: ProviderState,
    pub authenticated: bool,
    pub last_error: Option<String>,
    pub last_connected_at: Option<SystemTime>,
}

struct Shared {
    state: RwLock<ProviderState>,
    last_error: RwLock<Option<String>>,
    last_connected_at: RwLock<Option<(SystemTime, Instant)>>,
}

/// A configured endpoint to one Asterisk server. Exclusively owns at most
/// one [`SessionHandle`] at a time (`spec.md` §3's provider ownership
/// invariant) — `connect` replaces whatever handle it held before.
pub struct Provider {
    pub config: ProviderConfig,
    shared: Arc<Shared>,
    session: RwLock<Option<SessionHandle>>,
}

impl Provider {
    pub fn new(config: ProviderConfig) -> Self {
        Provider {
            config,
            shared: Arc::new(Shared {
                state: RwLock::new(ProviderState::Idle),
                last_error: RwLock::new(None),
                last_connected_at: RwLock::new(None),
            }),
            session: RwLock::new(None),
        }
    }

    /// Dials the configured endpoint, runs the login handshake, and — on
    /// success — installs the resulting session as this provider's
    /// current session and records the connect time. On failure, records
    /// `last_error` and leaves the provider without a session.
    pub async fn connect(
        &self,
        catalog: Arc<dyn ActionCatalog>,
        bus: SubscriptionBus,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SessionHandle, AmiError> {
        match session::connect(&self.config, catalog, bus, shutdown).await {
            Ok(handle) => {
                *self.shared.state.write().expect("provider lock poisoned") = ProviderState::Connected;
                *self.shared.last_error.write().expect("provider lock poisoned") = None;
                *self
                    .shared
                    .last_connected_at
                    .write()
                    .expect("provider lock poisoned") = Some((SystemTime::now(), Instant::now()));
                *self.session.write().expect("provider lock poisoned") = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                *self.shared.state.write().expect("provider lock poisoned") = ProviderState::Reconnecting;
                *self.shared.last_error.write().expect("provider lock poisoned") = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Releases the current session without touching the transport
    /// directly — the session's own run loop owns that; this only
    /// updates the provider's bookkeeping once the session has already
    /// closed (or is being abandoned by a `Stop`).
    pub fn disconnect(&self) {
        *self.session.write().expect("provider lock poisoned") = None;
        *self.shared.state.write().expect("provider lock poisoned") = ProviderState::Stopped;
    }

    pub fn mark_reconnecting(&self) {
        *self.session.write().expect("provider lock poisoned") = None;
        *self.shared.state.write().expect("provider lock poisoned") = ProviderState::Reconnecting;
    }

    /// Records why a previously established session ended, so the next
    /// [`Self::snapshot`] (and the health report built from it) surfaces
    /// the reason rather than going stale with whatever error (or none)
    /// the last *connect* attempt produced. Distinct from a connect
    /// failure: this is C7's `LastError` reflecting a session that was
    /// `Online` and then dropped (`spec.md` §4.7).
    pub fn record_disconnect(&self, reason: &str) {
        *self.shared.last_error.write().expect("provider lock poisoned") = Some(reason.to_owned());
    }

    pub fn current_session(&self) -> Option<SessionHandle> {
        self.session.read().expect("provider lock poisoned").clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().expect("provider lock poisoned").clone()
    }

    pub fn last_connected_at(&self) -> Option<SystemTime> {
        self.shared
            .last_connected_at
            .read()
            .expect("provider lock poisoned")
            .map(|(wall, _)| wall)
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        let state = self.shared.state.read().expect("provider lock poisoned").clone();
        let authenticated = matches!(state, ProviderState::Connected)
            && matches!(
                self.current_session().map(|h| h.state()),
                Some(SessionState::Online)
            );
        ProviderSnapshot {
            title: self.config.title.clone(),
            address: self.config.address.clone(),
            port: self.config.port,
            state,
            authenticated,
            last_error: self.last_error(),
            last_connected_at: self.last_connected_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ProviderConfig {
        ProviderConfig {
            title: "primary".to_owned(),
            address: "127.0.0.1".to_owned(),
            port: 1, // nothing listens here
            username: "admin".to_owned(),
            secret: "secret".to_owned(),
            use_tls: false,
            auth_mode: AuthMode::Challenge,
            event_mask: "on".to_owned(),
            keep_alive_interval: None,
            default_action_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn fresh_provider_starts_idle_with_no_session() {
        let provider = Provider::new(config());
        assert_eq!(provider.snapshot().state, ProviderState::Idle);
        assert!(provider.current_session().is_none());
    }

    #[tokio::test]
    async fn failed_connect_records_last_error_and_marks_reconnecting() {
        let provider = Provider::new(config());
        let catalog: Arc<dyn ActionCatalog> = Arc::new(ami_protocol::default_catalog());
        let bus = SubscriptionBus::new(8);
        let (_tx, rx) = watch::channel(false);
        let result = provider.connect(catalog, bus, rx).await;
        assert!(result.is_err());
        assert_eq!(provider.snapshot().state, ProviderState::Reconnecting);
        assert!(provider.last_error().is_some());
    }

    #[test]
    fn disconnect_clears_session_and_marks_stopped() {
        let provider = Provider::new(config());
        provider.disconnect();
        assert_eq!(provider.snapshot().state, ProviderState::Stopped);
        assert!(provider.current_session().is_none());
    }

    #[test]
    fn record_disconnect_surfaces_as_last_error() {
        let provider = Provider::new(config());
        provider.record_disconnect("no traffic from peer for 60s, treating as stalled");
        assert_eq!(
            provider.last_error().as_deref(),
            Some("no traffic from peer for 60s, treating as stalled")
        );
    }
}
