//! Bounded memory of already-handled deliveries.

use super::AgentMessage;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Remembers the most recent `capacity` `(correlation_id, message_id)` keys.
#[derive(Debug)]
pub struct Deduplicator {
    capacity: usize,
    inner: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    keys: HashSet<(String, String)>,
    order: VecDeque<(String, String)>,
}

impl Deduplicator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Seen::default()),
        }
    }

    /// Returns `true` the first time a message is offered, `false` for repeats.
    pub fn first_delivery(&self, message: &AgentMessage) -> bool {
        let key = message.dedup_key();
        let mut seen = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if seen.keys.contains(&key) {
            return false;
        }

        if seen.order.len() >= self.capacity
            && let Some(oldest) = seen.order.pop_front()
        {
            seen.keys.remove(&oldest);
        }
        seen.keys.insert(key.clone());
        seen.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MessageKind;

    fn message() -> AgentMessage {
        AgentMessage::new(MessageKind::Heartbeat, "a", "b", serde_json::json!({}))
    }

    #[test]
    fn test_repeat_delivery_is_detected() {
        let dedup = Deduplicator::new(8);
        let msg = message();
        assert!(dedup.first_delivery(&msg));
        assert!(!dedup.first_delivery(&msg.clone()));
    }

    #[test]
    fn test_same_correlation_different_message_is_new() {
        let dedup = Deduplicator::new(8);
        let first = message();
        let second = first.reply(MessageKind::TaskResult, "b", serde_json::json!({}));
        assert!(dedup.first_delivery(&first));
        assert!(dedup.first_delivery(&second));
    }

    #[test]
    fn test_oldest_keys_are_evicted() {
        let dedup = Deduplicator::new(2);
        let a = message();
        let b = message();
        let c = message();
        assert!(dedup.first_delivery(&a));
        assert!(dedup.first_delivery(&b));
        assert!(dedup.first_delivery(&c));
        assert_eq!(dedup.len(), 2);
        assert!(dedup.first_delivery(&a));
    }
}
