//! C9: a stateless health-grading function over a provider snapshot.

use crate::config::{HealthConfig, HealthThreshold};
use crate::provider::{ProviderSnapshot, ProviderState};
use serde::Serialize;

/// Per-provider detail carried in a [`HealthReport`], matching `spec.md`
/// §4.9's enumerated fields.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthInfo {
    pub title: String,
    pub address: String,
    pub port: u16,
    pub has_transport: bool,
    pub connected: bool,
    pub authenticated: bool,
    pub status: String,
    pub last_error: Option<String>,
    #[serde(with = "time_opt")]
    pub last_connected_at: Option<std::time::SystemTime>,
}

/// A graded snapshot of the supervisor and its providers.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub total_providers: usize,
    pub connected_providers: usize,
    pub providers: Vec<ProviderHealthInfo>,
    pub is_healthy: bool,
    pub status_message: String,
    /// Caller-supplied data merged in verbatim (`spec.md` §4.9); the
    /// evaluator itself never inspects this.
    pub extended: serde_json::Value,
}

/// Grades `providers` against `cfg.threshold`. A provider counts as
/// "connected" for threshold purposes when it is authenticated
/// (`ProviderState::Connected` *and* its session reached `Online`) — a
/// provider mid-reconnect or merely holding an open, unauthenticated
/// transport does not count.
///
/// No providers configured is always unhealthy, regardless of threshold
/// (`spec.md` §4.9).
pub fn evaluate(
    providers: &[ProviderSnapshot],
    cfg: &HealthConfig,
    extended: serde_json::Value,
) -> HealthReport {
    let total = providers.len();
    let connected = providers.iter().filter(|p| p.authenticated).count();

    let is_healthy = if total == 0 {
        false
    } else {
        match cfg.threshold {
            HealthThreshold::All => connected == total,
            HealthThreshold::Majority => connected * 2 > total,
            HealthThreshold::AtLeastOne => connected >= 1,
            HealthThreshold::MinimumPercentage(pct) => {
                connected * 100 >= total * usize::from(pct)
            }
        }
    };

    let status_message = if total == 0 {
        "no providers configured".to_owned()
    } else if is_healthy {
        format!("{connected}/{total} providers healthy")
    } else {
        format!("unhealthy: {connected}/{total} providers connected and authenticated")
    };

    let provider_infos = providers
        .iter()
        .map(|p| ProviderHealthInfo {
            title: p.title.clone(),
            address: p.address.clone(),
            port: p.port,
            has_transport: !matches!(p.state, ProviderState::Idle | ProviderState::Stopped),
            connected: matches!(p.state, ProviderState::Connected),
            authenticated: p.authenticated,
            status: status_text(p),
            last_error: p.last_error.clone(),
            last_connected_at: p.last_connected_at,
        })
        .collect();

    HealthReport {
        total_providers: total,
        connected_providers: connected,
        providers: provider_infos,
        is_healthy,
        status_message,
        extended,
    }
}

fn status_text(p: &ProviderSnapshot) -> String {
    match p.state {
        ProviderState::Idle => "idle".to_owned(),
        ProviderState::Connected if p.authenticated => "online".to_owned(),
        ProviderState::Connected => "connected, authenticating".to_owned(),
        ProviderState::Reconnecting => "reconnecting".to_owned(),
        ProviderState::Stopped => "stopped".to_owned(),
    }
}

mod time_opt {
    use serde::Serializer;
    use std::time::SystemTime;

    pub fn serialize<S: Serializer>(value: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        match value.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()) {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }
}
