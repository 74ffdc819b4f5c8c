//! Bounded message history.
//!
//! An explicit fixed-capacity ring buffer, not an unbounded list with
//! post-hoc trimming: each session has a hard memory bound regardless of how
//! many messages it relays. The history is a best-effort recent-activity
//! log, not a durable audit trail.

use std::collections::VecDeque;

use crate::protocol::SignalingMessage;

/// Hard cap on retained messages per session.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Fixed-capacity message ring buffer, oldest evicted first.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    entries: VecDeque<SignalingMessage>,
    capacity: usize,
}

impl MessageHistory {
    /// Create a history with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message, evicting the oldest entry when full.
    pub fn push(&mut self, message: SignalingMessage) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &SignalingMessage> {
        self.entries.iter()
    }

    /// The most recent `n` messages, oldest-first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &SignalingMessage> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip)
    }

    /// Drop all retained messages, freeing memory eagerly.
    pub fn clear(&mut self) {
        self.entries = VecDeque::new();
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::MessageBody;

    fn heartbeat(n: usize) -> SignalingMessage {
        SignalingMessage::new("s1", format!("u{n}"), MessageBody::Heartbeat)
    }

    #[test]
    fn test_push_within_capacity() {
        let mut history = MessageHistory::new(3);
        history.push(heartbeat(1));
        history.push(heartbeat(2));
        assert_eq!(history.len(), 2);
        assert!(!history.is_empty());
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut history = MessageHistory::new(3);
        for n in 1..=5 {
            history.push(heartbeat(n));
        }

        assert_eq!(history.len(), 3);
        let senders: Vec<&str> = history.iter().map(|m| m.from_user_id.as_str()).collect();
        assert_eq!(senders, vec!["u3", "u4", "u5"]);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut history = MessageHistory::new(10);
        for n in 0..1000 {
            history.push(heartbeat(n));
            assert!(history.len() <= 10);
        }
    }

    #[test]
    fn test_recent_returns_tail() {
        let mut history = MessageHistory::new(10);
        for n in 1..=5 {
            history.push(heartbeat(n));
        }

        let senders: Vec<&str> = history.recent(2).map(|m| m.from_user_id.as_str()).collect();
        assert_eq!(senders, vec!["u4", "u5"]);

        // Asking for more than is retained returns everything
        assert_eq!(history.recent(100).count(), 5);
    }

    #[test]
    fn test_clear_empties() {
        let mut history = MessageHistory::new(3);
        history.push(heartbeat(1));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let history = MessageHistory::new(0);
        assert_eq!(history.capacity(), 1);
    }
}
