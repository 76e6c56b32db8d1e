//! Per-session `ActionID` generation (`spec.md` §4.3).

use ami_protocol::ActionId;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates unique `ActionID`s for one session.
///
/// A random nonce is drawn once, at construction (the session draws one
/// per `Dialling` attempt), and combined with a monotonically
/// increasing counter: `"{nonce:08x}-{seq}"`. The nonce keeps IDs from
/// two reconnect attempts of the same session from colliding if a
/// stale response from a previous TCP connection is somehow still in
/// flight; the counter keeps IDs unique within one connection.
pub struct ActionIdGenerator {
    nonce: u32,
    next_seq: AtomicU64,
}

impl ActionIdGenerator {
    pub fn new() -> Self {
        ActionIdGenerator {
            nonce: rand::thread_rng().gen(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> ActionId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        ActionId(format!("{:08x}-{}", self.nonce, seq))
    }
}

impl Default for ActionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_share_a_nonce_prefix() {
        let gen = ActionIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        let prefix_a = a.as_str().split('-').next().unwrap();
        let prefix_b = b.as_str().split('-').next().unwrap();
        assert_eq!(prefix_a, prefix_b);
    }
}
