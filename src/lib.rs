//! Multi-provider Asterisk Manager Interface (AMI) client runtime.
//!
//! This crate is the concurrent machinery described in the design doc:
//! persistent authenticated sessions to one or more Asterisk servers,
//! a line-oriented wire decoder, action/response/event correlation, a
//! non-blocking subscription fan-out, and a supervising reconnection
//! loop with an accompanying health report.
//!
//! The catalogue of concrete AMI action/event payload shapes is
//! deliberately not part of this crate — see [`ami_protocol`] for the
//! opaque [`Action`](ami_protocol::Action) type and a reference
//! [`ActionCatalog`](ami_protocol::ActionCatalog) covering a working
//! subset of real actions.
//!
//! # Layout
//! - [`wire`] — C1: the framer (greeting detection, packet framing,
//!   `Follows` raw-body mode).
//! - [`record`] — C2: packet → typed record decoding.
//! - [`correlator`] — C4: action/response/event correlation and timeouts.
//! - [`session`] — C5: one authenticated conversation with one server.
//! - [`bus`] — C6: non-blocking event fan-out to subscribers.
//! - [`provider`] — C7: a configured, named endpoint.
//! - [`supervisor`] — C8: multi-provider orchestration and reconnection.
//! - [`health`] — C9: a pure health-grading function.
//! - [`config`] — the configuration surface (`spec.md` §6), loadable
//!   from TOML.
//! - [`error`] — the error taxonomy (`spec.md` §7).

pub mod action_id;
pub mod bus;
pub mod config;
pub mod correlator;
pub mod error;
pub mod health;
pub mod provider;
pub mod record;
pub mod session;
pub mod supervisor;
pub mod wire;

pub use ami_protocol;
pub use error::AmiError;

/// The outcome of a submitted action, as resolved by the [`correlator`].
///
/// `spec.md` §4.4 and §8: every submitted action resolves exactly once
/// to one of these variants.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A `CompletionShape::Single` action's response.
    Response(record::ActionResponse),
    /// A `CompletionShape::EventSeries` action's response plus the
    /// buffered intermediate events. The terminator event itself is not
    /// included — see `spec.md` §8 scenario 2.
    ResponseWithEvents(record::ActionResponse, Vec<record::Event>),
    /// No terminator/response arrived within the action's deadline.
    TimedOut,
    /// The caller cancelled the submission before it resolved.
    Cancelled,
    /// The owning session closed (or failed) while this action was
    /// in flight.
    Disconnected(String),
    /// The session's submit queue was saturated; the action was never
    /// written to the wire. `spec.md` §5's overflow policy — reject
    /// rather than block the caller.
    Busy,
}
