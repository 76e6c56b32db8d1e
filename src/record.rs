//! C2: packet → typed record decoding.

use crate::wire::Packet;
use ami_protocol::ActionId;
use std::collections::HashMap;

/// A decoded AMI packet, stripped of the framer's raw key-value shape.
///
/// Decoding is total — every [`Packet`] maps to exactly one variant,
/// never a decode error. An unrecognized discriminator (neither
/// `Response:` nor `Event:`) decodes to [`Record::Unknown`] rather than
/// being rejected, matching `spec.md` §4.2's "never panics".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    ActionResponse(ActionResponse),
    Event(Event),
    Unknown {
        discriminator: Option<String>,
        extras: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
    Follows,
    Goodbye,
    /// A status string the decoder doesn't recognize; carried verbatim
    /// rather than dropped.
    Other,
}

impl ResponseStatus {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "success" => ResponseStatus::Success,
            "error" => ResponseStatus::Error,
            "follows" => ResponseStatus::Follows,
            "goodbye" => ResponseStatus::Goodbye,
            _ => ResponseStatus::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    pub status: ResponseStatus,
    pub action_id: Option<ActionId>,
    pub message: Option<String>,
    /// Present only when `status == Follows`; filled in by the session
    /// after it reads the raw command body from the framer
    /// (`spec.md` §4.1). `None` on the record as decoded from the
    /// packet alone.
    pub output: Option<String>,
    pub extras: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub action_id: Option<ActionId>,
    pub extras: HashMap<String, String>,
}

/// Folds AMI's `<null>` sentinel to an empty string, the convention
/// `spec.md` §3 documents. Applied at the packet→record boundary so
/// the framer's [`Packet`] keeps raw strings for round-tripping.
fn fold_null(value: &str) -> String {
    if value == "<null>" {
        String::new()
    } else {
        value.to_owned()
    }
}

/// A key repeated outside the reserved discriminator fields accumulates
/// rather than overwrites, joined by `'\n'` (`spec.md` §4.2) — this is
/// what lets a decoded `Extras` map carry multi-line CLI output and the
/// `Variable:` family without losing all but the last occurrence.
fn extras_excluding(packet: &Packet, exclude: &[&str]) -> HashMap<String, String> {
    let mut extras: HashMap<String, String> = HashMap::new();
    for (key, value) in packet.iter() {
        if exclude.contains(&key) {
            continue;
        }
        let value = fold_null(value);
        extras
            .entry(key.to_owned())
            .and_modify(|existing| {
                existing.push('\n');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    extras
}

/// Decodes a framed [`Packet`] into a [`Record`].
///
/// This function does not consult an [`ami_protocol::ActionCatalog`] —
/// per-action/event payload shapes are out of scope (`spec.md` §1); the
/// catalog is only used by the correlator (C4) to decide completion
/// shape, not here.
pub fn decode(packet: &Packet) -> Record {
    if let Some(status) = packet.get("response") {
        let action_id = packet.get("actionid").map(|v| ActionId(v.to_owned()));
        let message = packet.get("message").map(fold_null);
        let extras = extras_excluding(packet, &["response", "actionid", "message"]);
        return Record::ActionResponse(ActionResponse {
            status: ResponseStatus::parse(status),
            action_id,
            message,
            output: None,
            extras,
        });
    }

    if let Some(name) = packet.get("event") {
        let action_id = packet.get("actionid").map(|v| ActionId(v.to_owned()));
        let extras = extras_excluding(packet, &["event", "actionid"]);
        return Record::Event(Event {
            name: name.to_owned(),
            action_id,
            extras,
        });
    }

    let discriminator = packet
        .iter()
        .next()
        .map(|(key, value)| format!("{key}: {value}"));
    Record::Unknown {
        discriminator,
        extras: extras_excluding(packet, &[]),
    }
}
