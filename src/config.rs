//! Configuration loading (`spec.md` §6).
//!
//! TOML is the sole config source. Follows the same `Raw*` +
//! validate-and-default shape as the forwarder's config loader in the
//! teacher repo: every field is optional on the wire, a public,
//! concrete type is built by validating and defaulting, and a single
//! [`ConfigError`] enum reports every way that can fail.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub providers: Vec<ProviderConfig>,
    pub retry: RetryPolicy,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub title: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub use_tls: bool,
    pub auth_mode: AuthMode,
    pub event_mask: String,
    pub keep_alive_interval: Option<Duration>,
    pub default_action_timeout: Duration,
}

/// Which of `spec.md` §4.5 step 3's two login modes a provider uses.
/// Defaults to `Challenge`: a plaintext secret on the wire is never
/// desirable when the server supports challenge/response, which every
/// modern Asterisk does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Challenge,
    Plaintext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub enable_initial_retry: bool,
    pub initial_retry_delay: Duration,
    pub delay_increment: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub stop_on_authentication_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthThreshold {
    All,
    Majority,
    AtLeastOne,
    MinimumPercentage(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    pub threshold: HealthThreshold,
    pub max_event_age: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            enable_initial_retry: true,
            initial_retry_delay: Duration::from_secs(1),
            delay_increment: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
            stop_on_authentication_failure: true,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            threshold: HealthThreshold::Majority,
            max_event_age: Duration::from_secs(120),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    providers: Option<Vec<RawProviderConfig>>,
    retry: Option<RawRetryPolicy>,
    health: Option<RawHealthConfig>,
}

#[derive(Debug, Deserialize)]
struct RawProviderConfig {
    title: Option<String>,
    address: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    secret: Option<String>,
    use_tls: Option<bool>,
    auth_mode: Option<String>,
    event_mask: Option<String>,
    keep_alive_interval_secs: Option<u64>,
    default_action_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRetryPolicy {
    enable_initial_retry: Option<bool>,
    initial_retry_delay_secs: Option<u64>,
    delay_increment_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    max_attempts: Option<u32>,
    stop_on_authentication_failure: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawHealthConfig {
    threshold: Option<String>,
    max_event_age_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<RuntimeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let raw_providers = raw
        .providers
        .ok_or_else(|| ConfigError::MissingField("providers".to_owned()))?;
    if raw_providers.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one [[providers]] entry is required".to_owned(),
        ));
    }

    let mut providers = Vec::with_capacity(raw_providers.len());
    for (i, p) in raw_providers.into_iter().enumerate() {
        let title = p
            .title
            .ok_or_else(|| ConfigError::MissingField(format!("providers[{i}].title")))?;
        let address = p
            .address
            .ok_or_else(|| ConfigError::MissingField(format!("providers[{i}].address")))?;
        let username = p
            .username
            .ok_or_else(|| ConfigError::MissingField(format!("providers[{i}].username")))?;
        let secret = p
            .secret
            .ok_or_else(|| ConfigError::MissingField(format!("providers[{i}].secret")))?;
        let auth_mode = match p.auth_mode.as_deref() {
            None => AuthMode::default(),
            Some("challenge") => AuthMode::Challenge,
            Some("plaintext") => AuthMode::Plaintext,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "providers[{i}].auth_mode: unrecognized value '{other}'"
                )));
            }
        };
        providers.push(ProviderConfig {
            title,
            address,
            port: p.port.unwrap_or(5038),
            username,
            secret,
            use_tls: p.use_tls.unwrap_or(false),
            auth_mode,
            event_mask: p.event_mask.unwrap_or_else(|| "on".to_owned()),
            keep_alive_interval: p.keep_alive_interval_secs.map(Duration::from_secs),
            default_action_timeout: Duration::from_secs(p.default_action_timeout_secs.unwrap_or(10)),
        });
    }

    let retry = match raw.retry {
        Some(r) => {
            let defaults = RetryPolicy::default();
            RetryPolicy {
                enable_initial_retry: r.enable_initial_retry.unwrap_or(defaults.enable_initial_retry),
                initial_retry_delay: r
                    .initial_retry_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.initial_retry_delay),
                delay_increment: r
                    .delay_increment_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.delay_increment),
                max_delay: r.max_delay_secs.map(Duration::from_secs).unwrap_or(defaults.max_delay),
                max_attempts: r.max_attempts.unwrap_or(defaults.max_attempts),
                stop_on_authentication_failure: r
                    .stop_on_authentication_failure
                    .unwrap_or(defaults.stop_on_authentication_failure),
            }
        }
        None => RetryPolicy::default(),
    };

    let health = match raw.health {
        Some(h) => {
            let defaults = HealthConfig::default();
            let threshold = match h.threshold.as_deref() {
                None => defaults.threshold,
                Some("all") => HealthThreshold::All,
                Some("majority") => HealthThreshold::Majority,
                Some("at-least-one") => HealthThreshold::AtLeastOne,
                Some(other) => {
                    if let Some(pct) = other.strip_suffix('%').and_then(|s| s.parse::<u8>().ok()) {
                        HealthThreshold::MinimumPercentage(pct)
                    } else {
                        return Err(ConfigError::InvalidValue(format!(
                            "health.threshold: unrecognized value '{other}'"
                        )));
                    }
                }
            };
            HealthConfig {
                threshold,
                max_event_age: h
                    .max_event_age_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.max_event_age),
            }
        }
        None => HealthConfig::default(),
    };

    Ok(RuntimeConfig {
        providers,
        retry,
        health,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}
