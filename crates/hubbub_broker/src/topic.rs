//! Topic records.
//!
//! A `Topic` holds the subscription set for one topic name plus a bounded
//! replay history. Subscriptions are a `HashSet` of `SubscriberId`;
//! duplicate subscriptions are a no-op. The history is a fixed-capacity
//! ring: `record` appends, evicting the oldest entry on overflow, and
//! `replay` reads the most recent entries in publish order.
//!
//! Concurrency note: callers must synchronize access to `Topic` (via the
//! registry lock) when modifying subscriptions or history.

use std::collections::{HashSet, VecDeque};

use crate::message::Event;

pub type SubscriberId = String;

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<SubscriberId>,
    history: VecDeque<Event>,
    capacity: usize,
    message_count: u64,
}

impl Topic {
    /// Create a new topic with the given replay-ring capacity.
    /// A capacity of 0 disables replay entirely.
    pub fn new(name: &str, capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
            history: VecDeque::with_capacity(capacity),
            capacity,
            message_count: 0,
        }
    }

    /// Add a subscriber to the topic. Duplicate adds are ignored.
    pub fn subscribe(&mut self, id: SubscriberId) {
        self.subscribers.insert(id);
    }

    /// Remove a subscriber from the topic. Returns whether it was a member.
    pub fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    /// Append a published event to the replay ring, evicting the oldest
    /// entry when the ring is full, and bump the publish counter.
    pub fn record(&mut self, event: Event) {
        if self.capacity > 0 {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(event);
        }
        self.message_count += 1;
    }

    /// The most recent `min(last_n, |history|)` events, oldest first.
    pub fn replay(&self, last_n: usize) -> Vec<Event> {
        let k = last_n.min(self.history.len());
        self.history
            .iter()
            .skip(self.history.len() - k)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Publishes since topic creation (not capped by the ring).
    pub fn message_count(&self) -> u64 {
        self.message_count
    }
}
