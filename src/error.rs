use std::time::Duration;

/// The error taxonomy for the runtime (`spec.md` §7).
///
/// This enum is reserved for conditions that abort a session or a
/// submit attempt *before* an in-flight entry exists in the
/// [`correlator`](crate::correlator). A timed-out, cancelled, or
/// disconnected action that was already in flight resolves as a normal
/// [`crate::Outcome`], not an `AmiError` — see `spec.md` §4.4.
#[derive(Debug, thiserror::Error)]
pub enum AmiError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("greeting line did not match an Asterisk Call Manager banner: {0:?}")]
    UnexpectedGreeting(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("login handshake timed out after {0:?}")]
    LoginTimedOut(Duration),

    #[error("too many actions in flight (capacity {0})")]
    Busy(usize),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("session is not connected")]
    NotConnected,
}
