//! Constructors for the reference action subset in [`crate::default_catalog`].
//!
//! Each returns an [`Action`] with `action_id` left blank — the session's
//! `ActionIdGenerator` stamps it at submit time (`spec.md` §4.3).

use crate::action::{Action, CompletionShape};

pub fn challenge(auth_type: &str) -> Action {
    Action::new("Challenge", CompletionShape::Single).with_field("AuthType", auth_type)
}

pub fn login_plaintext(username: &str, secret: &str, event_mask: &str) -> Action {
    Action::new("Login", CompletionShape::Single)
        .with_field("Username", username)
        .with_field("Secret", secret)
        .with_field("Events", event_mask)
}

pub fn login_md5(username: &str, key_hex: &str, event_mask: &str) -> Action {
    Action::new("Login", CompletionShape::Single)
        .with_field("AuthType", "MD5")
        .with_field("Username", username)
        .with_field("Key", key_hex)
        .with_field("Events", event_mask)
}

pub fn ping() -> Action {
    Action::new("Ping", CompletionShape::Single)
}

pub fn logoff() -> Action {
    Action::new("Logoff", CompletionShape::Single)
}

pub fn command(cli_command: &str) -> Action {
    Action::new("Command", CompletionShape::Single).with_field("Command", cli_command)
}

pub fn queue_status(queue: Option<&str>) -> Action {
    let mut action = Action::new(
        "QueueStatus",
        CompletionShape::EventSeries {
            terminator: "QueueStatusComplete".to_owned(),
        },
    );
    if let Some(queue) = queue {
        action = action.with_field("Queue", queue);
    }
    action
}

/// `variables` are flattened into repeating `Variable:` lines, preserving
/// duplicate keys in order (`spec.md` §8 scenario 6).
pub fn originate(
    channel: &str,
    context: &str,
    exten: &str,
    priority: &str,
    timeout_ms: Option<u64>,
    variables: &[(String, String)],
) -> Action {
    let mut action = Action::new(
        "Originate",
        CompletionShape::EventSeries {
            terminator: "OriginateResponse".to_owned(),
        },
    )
    .with_field("Channel", channel)
    .with_field("Context", context)
    .with_field("Exten", exten)
    .with_field("Priority", priority)
    .with_field("Async", "true");

    if let Some(timeout_ms) = timeout_ms {
        action = action.with_field("Timeout", timeout_ms.to_string());
    }
    for (key, value) in variables {
        action = action.with_variable(key.clone(), value.clone());
    }
    action
}
