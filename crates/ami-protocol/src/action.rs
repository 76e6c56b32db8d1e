use serde::{Deserialize, Serialize};

/// A unique identifier stamped on every outgoing action by the session's
/// encoder. Never overwritten once assigned — see `spec.md` §3 invariant
/// "ActionIDs assigned in a session are unique within that session".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActionId {
    fn from(s: String) -> Self {
        ActionId(s)
    }
}

/// How a submitted action's outcome is resolved by the correlator.
///
/// See `spec.md` §4.4: *single* actions resolve on the first matching
/// response; *event-series* actions resolve after the response is
/// followed by zero or more events and a named terminator event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionShape {
    /// Resolves on the first `ActionResponse` bearing the action's ID.
    Single,
    /// Resolves after `ActionResponse` (if `Error`, immediately), then
    /// buffers events until one named `terminator` arrives.
    EventSeries { terminator: String },
}

/// An outgoing AMI action: opaque to the core beyond name, ID, flat
/// body fields, and an optional repeating `Variable:` list.
///
/// `fields` and `variables` preserve insertion order — the encoder must
/// emit them in that order and must never merge repeated `Variable:`
/// entries into one line (`spec.md` §8 scenario 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub action_id: ActionId,
    pub fields: Vec<(String, String)>,
    pub variables: Vec<(String, String)>,
    pub completion: CompletionShape,
}

impl Action {
    /// Start building an action with the given name. `action_id` is
    /// assigned later by the session's `ActionIdGenerator`, not here —
    /// callers build a "template" and the session stamps the ID at
    /// submit time.
    pub fn new(name: impl Into<String>, completion: CompletionShape) -> Self {
        Action {
            name: name.into(),
            action_id: ActionId(String::new()),
            fields: Vec::new(),
            variables: Vec::new(),
            completion,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((key.into(), value.into()));
        self
    }

    pub fn with_action_id(mut self, action_id: ActionId) -> Self {
        self.action_id = action_id;
        self
    }

    /// Render the action in AMI wire format, CRLF-terminated, ending in
    /// the packet-terminating blank line.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("Action: {}\r\n", self.name).as_bytes());
        for (key, value) in &self.fields {
            out.extend_from_slice(format!("{key}: {value}\r\n").as_bytes());
        }
        for (key, value) in &self.variables {
            out.extend_from_slice(format!("Variable: {key}={value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("ActionID: {}\r\n", self.action_id).as_bytes());
        out.extend_from_slice(b"\r\n");
        out
    }
}
