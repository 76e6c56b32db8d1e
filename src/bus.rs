//! C6: non-blocking event fan-out to subscribers.

use crate::record::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// A subscriber's interest: every event, or only events with a matching
/// name (case-insensitive), per `spec.md` §4.6 "predicate (event name or
/// `All`)".
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    Named(String),
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Named(name) => event.name.eq_ignore_ascii_case(name),
        }
    }
}

/// One subscriber's bounded inbox plus its drop counter.
struct Subscriber {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
    filter: EventFilter,
}

/// A handle returned to a subscriber: an event receiver plus visibility
/// into how many events this subscriber has dropped because its inbox
/// was full.
pub struct Subscription {
    pub events: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
    id: u64,
    bus: Arc<Inner>,
}

impl Subscription {
    /// Events dropped for this subscriber because its inbox was full
    /// when they arrived (`spec.md` §4.6).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(self.id);
    }
}

struct Inner {
    subscribers: RwLock<Arc<Vec<(u64, Subscriber)>>>,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl Inner {
    fn remove(&self, id: u64) {
        let mut guard = self.subscribers.write().expect("subscription bus lock poisoned");
        let retained: Vec<_> = guard.iter().filter(|(sub_id, _)| *sub_id != id).cloned().collect();
        *guard = Arc::new(retained);
    }
}

impl Clone for Subscriber {
    fn clone(&self) -> Self {
        Subscriber {
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
            filter: self.filter.clone(),
        }
    }
}

/// The per-session/per-provider event fan-out.
///
/// The subscriber list is held behind `RwLock<Arc<Vec<_>>>`: the hot
/// publish path takes a read lock just long enough to clone the `Arc`,
/// then iterates the snapshot lock-free; subscribe/unsubscribe
/// replace the whole `Arc` under a write lock. This matches §4.6 and
/// §5's "copy-on-write... hot path reads... lock-free" requirement as
/// closely as safe stdlib primitives allow, the way
/// `forwarder::local_fanout::FanoutServer` snapshots its client list
/// before a broadcast.
pub struct SubscriptionBus {
    inner: Arc<Inner>,
}

impl SubscriptionBus {
    /// `channel_capacity` bounds each subscriber's inbox; a full inbox
    /// drops the event rather than blocking the publisher, per §4.6.
    pub fn new(channel_capacity: usize) -> Self {
        SubscriptionBus {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(0),
                channel_capacity,
            }),
        }
    }

    /// Subscribes to every event, regardless of name.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_filtered(EventFilter::All)
    }

    /// Subscribes with a predicate restricting which events are
    /// delivered to this subscriber's inbox.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.channel_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            tx,
            dropped: dropped.clone(),
            filter,
        };

        let mut guard = self
            .inner
            .subscribers
            .write()
            .expect("subscription bus lock poisoned");
        let mut next: Vec<_> = guard.iter().cloned().collect();
        next.push((id, subscriber));
        *guard = Arc::new(next);
        drop(guard);

        Subscription {
            events: rx,
            dropped,
            id,
            bus: self.inner.clone(),
        }
    }

    /// Publishes `event` to every current subscriber. Never blocks: a
    /// subscriber whose inbox is full has the event dropped and its
    /// counter incremented instead of stalling the publisher.
    pub fn publish(&self, event: Event) {
        let snapshot = self
            .inner
            .subscribers
            .read()
            .expect("subscription bus lock poisoned")
            .clone();
        for (_, subscriber) in snapshot.iter() {
            if !subscriber.filter.matches(&event) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.tx.try_send(event.clone())
            {
                subscriber.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .expect("subscription bus lock poisoned")
            .len()
    }
}

impl Clone for SubscriptionBus {
    fn clone(&self) -> Self {
        SubscriptionBus {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn event(name: &str) -> Event {
        Event {
            name: name.to_owned(),
            action_id: None,
            extras: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_published_events() {
        let bus = SubscriptionBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(event("PeerStatus"));

        assert_eq!(a.events.recv().await.unwrap().name, "PeerStatus");
        assert_eq!(b.events.recv().await.unwrap().name, "PeerStatus");
    }

    #[tokio::test]
    async fn dropping_a_subscription_removes_it_from_the_bus() {
        let bus = SubscriptionBus::new(8);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn full_inbox_drops_events_and_counts_them_instead_of_blocking() {
        let bus = SubscriptionBus::new(1);
        let mut sub = bus.subscribe();
        bus.publish(event("One"));
        bus.publish(event("Two"));
        assert_eq!(sub.dropped_count(), 1);
        assert_eq!(sub.events.recv().await.unwrap().name, "One");
    }

    #[tokio::test]
    async fn named_filter_only_delivers_matching_events() {
        let bus = SubscriptionBus::new(8);
        let mut sub = bus.subscribe_filtered(EventFilter::Named("QueueMember".to_owned()));
        bus.publish(event("PeerStatus"));
        bus.publish(event("queuemember"));
        let received = sub.events.recv().await.unwrap();
        assert_eq!(received.name, "queuemember");
        assert!(sub.events.try_recv().is_err());
    }
}
