//! C4: matches submitted actions to their eventual [`crate::Outcome`].

use crate::record::{ActionResponse, Event, ResponseStatus};
use crate::Outcome;
use ami_protocol::{ActionCatalog, ActionId, CompletionShape};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

struct InFlight {
    completion: CompletionShape,
    stashed_response: Option<ActionResponse>,
    buffered_events: Vec<Event>,
    resolve: Option<oneshot::Sender<Outcome>>,
}

/// The in-flight action table for one session.
///
/// A plain `std::sync::Mutex` guards the table; per §5, the lock is
/// never held across an `.await` point — every method here only
/// touches the table synchronously, then releases it before any
/// suspension.
pub struct Correlator {
    table: Mutex<HashMap<ActionId, InFlight>>,
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `action_id` as in flight with the given completion
    /// shape. Synchronous and immediate — callers register *before*
    /// writing the action's bytes to the socket, so a response that
    /// arrives the instant the write completes can never race ahead of
    /// the table entry it needs to find.
    pub fn register(
        &self,
        action_id: ActionId,
        action_name: &str,
        catalog: &dyn ActionCatalog,
    ) -> oneshot::Receiver<Outcome> {
        let completion = catalog
            .completion_shape(action_name)
            .unwrap_or(CompletionShape::Single);
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock().expect("correlator mutex poisoned");
        table.insert(
            action_id,
            InFlight {
                completion,
                stashed_response: None,
                buffered_events: Vec::new(),
                resolve: Some(tx),
            },
        );
        rx
    }

    /// Waits for a registered action to resolve, or for `deadline` to
    /// elapse, whichever comes first. Removes the table entry in
    /// either case.
    pub async fn wait(
        &self,
        action_id: ActionId,
        deadline: Duration,
        rx: oneshot::Receiver<Outcome>,
    ) -> Outcome {
        match timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.table.lock().expect("correlator mutex poisoned").remove(&action_id);
                Outcome::Disconnected("session closed before the action resolved".to_owned())
            }
            Err(_) => {
                self.table.lock().expect("correlator mutex poisoned").remove(&action_id);
                Outcome::TimedOut
            }
        }
    }

    /// Convenience wrapper over [`register`](Self::register) +
    /// [`wait`](Self::wait) for callers that don't need the write to
    /// happen strictly between the two (e.g. tests).
    pub async fn submit(
        &self,
        action_id: ActionId,
        action_name: &str,
        catalog: &dyn ActionCatalog,
        deadline: Duration,
    ) -> Outcome {
        let rx = self.register(action_id.clone(), action_name, catalog);
        self.wait(action_id, deadline, rx).await
    }

    /// Cancels an in-flight action, resolving its future with
    /// `Outcome::Cancelled` instead of letting it hit its deadline.
    pub fn cancel(&self, action_id: &ActionId) {
        let entry = self.table.lock().expect("correlator mutex poisoned").remove(action_id);
        if let Some(mut entry) = entry {
            if let Some(resolve) = entry.resolve.take() {
                let _ = resolve.send(Outcome::Cancelled);
            }
        }
    }

    /// Feeds a decoded `ActionResponse` into the table. Resolves
    /// `Single`-shape actions immediately. `EventSeries`-shape actions
    /// resolve immediately only if the response is `Error`; otherwise
    /// the response is stashed and the action waits for its terminator
    /// event (`spec.md` §4.4).
    pub fn handle_response(&self, response: ActionResponse) {
        let Some(action_id) = response.action_id.clone() else {
            return;
        };
        let mut table = self.table.lock().expect("correlator mutex poisoned");
        let is_series = match table.get(&action_id) {
            Some(entry) => matches!(entry.completion, CompletionShape::EventSeries { .. }),
            None => return,
        };

        if !is_series || response.status == ResponseStatus::Error {
            if let Some(mut in_flight) = table.remove(&action_id) {
                if let Some(resolve) = in_flight.resolve.take() {
                    let _ = resolve.send(Outcome::Response(response));
                }
            }
        } else if let Some(entry) = table.get_mut(&action_id) {
            entry.stashed_response = Some(response);
        }
    }

    /// Feeds a decoded `Event` into the table. Events without an
    /// `ActionID` (the overwhelming majority of AMI events) are not
    /// the correlator's concern — see [`crate::bus`] for fan-out of
    /// those. Events that do carry the `ActionID` of an in-flight
    /// `EventSeries` action are buffered until the named terminator
    /// arrives, at which point the action resolves with the stashed
    /// response and the buffered events, terminator excluded
    /// (`spec.md` §8 scenario 2).
    pub fn handle_event(&self, event: Event) {
        let Some(action_id) = event.action_id.clone() else {
            return;
        };
        let mut table = self.table.lock().expect("correlator mutex poisoned");
        let is_terminator = match table.get(&action_id) {
            Some(entry) => match &entry.completion {
                CompletionShape::EventSeries { terminator } => {
                    event.name.eq_ignore_ascii_case(terminator)
                }
                CompletionShape::Single => return,
            },
            None => return,
        };

        if is_terminator {
            if let Some(mut in_flight) = table.remove(&action_id) {
                if let (Some(response), Some(resolve)) =
                    (in_flight.stashed_response.take(), in_flight.resolve.take())
                {
                    let _ = resolve.send(Outcome::ResponseWithEvents(
                        response,
                        in_flight.buffered_events,
                    ));
                }
            }
        } else if let Some(entry) = table.get_mut(&action_id) {
            entry.buffered_events.push(event);
        }
    }

    /// Resolves every still-in-flight action as disconnected. Called
    /// by the session when the transport drops or the session fails.
    pub fn fail_all(&self, reason: &str) {
        let mut table = self.table.lock().expect("correlator mutex poisoned");
        for (_, mut entry) in table.drain() {
            if let Some(resolve) = entry.resolve.take() {
                let _ = resolve.send(Outcome::Disconnected(reason.to_owned()));
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.table.lock().expect("correlator mutex poisoned").len()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
