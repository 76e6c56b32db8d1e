//! AMI protocol value types.
//!
//! The core client runtime (`ami`) treats actions and events as opaque
//! key/value records discriminated by a single name field — see the
//! crate-level docs on `ami` for why. This crate supplies the concrete
//! pieces that *are* worth naming: the wire-level [`Action`] shape, an
//! AMI-style boolean field parser, and a reference [`ActionCatalog`]
//! covering a working subset of real AMI actions (`Login`, `Challenge`,
//! `Ping`, `Logoff`, `Originate`, `QueueStatus`, `Command`, `Hangup`,
//! `Redirect`, `GetVar`, `SetVar`, `CoreStatus`).
//!
//! Enumerating the full catalogue of AMI actions and events is explicitly
//! out of scope for this crate; `default_catalog()` exists to give
//! [`ami::correlator::Correlator`](../ami/correlator/struct.Correlator.html)
//! something concrete to dispatch on, not to be exhaustive.

mod action;
mod bool_convert;
mod catalog;
pub mod actions;

pub use action::{Action, ActionId, CompletionShape};
pub use bool_convert::parse_ami_bool;
pub use catalog::{default_catalog, ActionCatalog, StaticActionCatalog};
