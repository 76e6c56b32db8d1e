use crate::action::CompletionShape;
use std::collections::HashMap;

/// Maps an action name to its completion shape.
///
/// This is the "type registry" `spec.md` §2 describes for C4: given an
/// action name, does the correlator expect a single response, or a
/// response followed by a buffered event series terminated by a named
/// event? The core's [`Correlator`](../ami/correlator/struct.Correlator.html)
/// is generic over this trait so a caller can supply their own catalogue
/// without this crate enumerating every AMI action that exists.
pub trait ActionCatalog: Send + Sync {
    /// Returns the completion shape for `action_name`, or `None` if the
    /// action isn't registered — callers should treat an unregistered
    /// action as `CompletionShape::Single`, the common case.
    fn completion_shape(&self, action_name: &str) -> Option<CompletionShape>;
}

/// A `HashMap`-backed [`ActionCatalog`] keyed by lowercased action name.
pub struct StaticActionCatalog {
    entries: HashMap<String, CompletionShape>,
}

impl StaticActionCatalog {
    pub fn new() -> Self {
        StaticActionCatalog {
            entries: HashMap::new(),
        }
    }

    pub fn with_entry(mut self, action_name: &str, shape: CompletionShape) -> Self {
        self.entries.insert(action_name.to_ascii_lowercase(), shape);
        self
    }
}

impl Default for StaticActionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionCatalog for StaticActionCatalog {
    fn completion_shape(&self, action_name: &str) -> Option<CompletionShape> {
        self.entries.get(&action_name.to_ascii_lowercase()).cloned()
    }
}

/// A reference catalogue covering a working subset of real AMI actions.
///
/// `Login`, `Challenge`, `Ping`, and `Logoff` resolve as `Single` — the
/// core's session handshake relies on this. `QueueStatus` is the
/// canonical event-series example from `spec.md` §8 scenario 2,
/// terminated by `QueueStatusComplete`. `Originate` is event-series,
/// terminated by `OriginateResponse` per §4.9 Open Questions — the
/// intermediate `OriginateSuccess`/`OriginateFailure` events aren't
/// generated by all Asterisk versions, so only the terminator is relied
/// upon. `Command` is `Single`; its `Follows` body is handled by the
/// framer (`spec.md` §4.1), not by an event series.
pub fn default_catalog() -> StaticActionCatalog {
    StaticActionCatalog::new()
        .with_entry("login", CompletionShape::Single)
        .with_entry("challenge", CompletionShape::Single)
        .with_entry("ping", CompletionShape::Single)
        .with_entry("logoff", CompletionShape::Single)
        .with_entry("command", CompletionShape::Single)
        .with_entry("getvar", CompletionShape::Single)
        .with_entry("setvar", CompletionShape::Single)
        .with_entry("hangup", CompletionShape::Single)
        .with_entry("redirect", CompletionShape::Single)
        .with_entry("corestatus", CompletionShape::Single)
        .with_entry(
            "queuestatus",
            CompletionShape::EventSeries {
                terminator: "QueueStatusComplete".to_owned(),
            },
        )
        .with_entry(
            "originate",
            CompletionShape::EventSeries {
                terminator: "OriginateResponse".to_owned(),
            },
        )
        .with_entry(
            "coreshowchannels",
            CompletionShape::EventSeries {
                terminator: "CoreShowChannelsComplete".to_owned(),
            },
        )
        .with_entry(
            "status",
            CompletionShape::EventSeries {
                terminator: "StatusComplete".to_owned(),
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_marks_queue_status_as_event_series() {
        let catalog = default_catalog();
        assert_eq!(
            catalog.completion_shape("QueueStatus"),
            Some(CompletionShape::EventSeries {
                terminator: "QueueStatusComplete".to_owned()
            })
        );
    }

    #[test]
    fn default_catalog_lookup_is_case_insensitive() {
        let catalog = default_catalog();
        assert_eq!(catalog.completion_shape("LOGIN"), Some(CompletionShape::Single));
        assert_eq!(catalog.completion_shape("login"), Some(CompletionShape::Single));
    }

    #[test]
    fn unregistered_action_returns_none() {
        let catalog = default_catalog();
        assert_eq!(catalog.completion_shape("SomeFutureAction"), None);
    }
}
