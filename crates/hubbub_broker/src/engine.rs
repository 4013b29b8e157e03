//! The registry.
//!
//! This module contains the in-memory broker kernel responsible for:
//! - managing topics, subscriber records and their cross-references
//! - fanning published events out to per-subscriber outbound queues
//! - maintaining each topic's bounded replay ring
//! - applying the configured backpressure policy during fan-out
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (`SharedBroker` is `Arc<Mutex<Broker>>`). The lock is the
//!   registry critical section: every invariant about topic/subscriber
//!   cross-references holds whenever the lock is free. Callers must never
//!   hold the lock across network I/O; all transport pushes inside the
//!   critical section are non-blocking `try_send`s.
//! - A failure to reach one subscriber never prevents delivery to the
//!   others. Failures are accumulated in the `PublishReceipt` and the dead
//!   records are removed before the operation returns.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use hubbub_config::BrokerSettings;

use crate::error::{BrokerError, Result};
use crate::message::{Event, EventMessage, ServerFrame};
use crate::subscriber::{EnqueueOutcome, Subscriber, TransportHandle};
use crate::topic::{SubscriberId, Topic};

/// The broker kernel behind its serialization lock.
pub type SharedBroker = Arc<Mutex<Broker>>;

/// Why a fan-out failed for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Queue overflow under the DISCONNECT policy.
    SlowConsumer,
    /// The transport was observed closed at enqueue time.
    TransportClosed,
}

/// One recipient a publish could not reach.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDelivery {
    pub client_id: SubscriberId,
    pub reason: FailureReason,
}

/// Result of a publish: the event was appended to the topic history and
/// enqueued to `subscribers_reached` recipients; `failed` lists the rest.
#[derive(Debug, PartialEq)]
pub struct PublishReceipt {
    pub subscribers_reached: usize,
    pub failed: Vec<FailedDelivery>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub uptime_sec: u64,
    pub topics: usize,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub messages: u64,
    pub subscribers: usize,
}

#[derive(Debug)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub subscribers: HashMap<SubscriberId, Subscriber>,
    settings: BrokerSettings,
    started_at: Instant,
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            topics: HashMap::new(),
            subscribers: HashMap::new(),
            settings,
            started_at: Instant::now(),
        }
    }

    /// Create a topic. The name is trimmed and must be non-empty.
    pub fn create_topic(&mut self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BrokerError::InvalidTopicName);
        }
        if self.topics.contains_key(name) {
            return Err(BrokerError::TopicAlreadyExists(name.to_string()));
        }
        self.topics.insert(
            name.to_string(),
            Topic::new(name, self.settings.ring_buffer_size),
        );
        info!(topic = name, "topic created");
        Ok(name.to_string())
    }

    /// Delete a topic: detach every subscriber (removing the topic from its
    /// joined set), enqueue a `topic_deleted` notice onto each outbound
    /// queue subject to the ordinary backpressure policy, then discard the
    /// topic.
    pub fn delete_topic(&mut self, name: &str) -> Result<String> {
        let topic = self
            .topics
            .remove(name)
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))?;

        let mut gone = Vec::new();
        for client_id in &topic.subscribers {
            let Some(sub) = self.subscribers.get_mut(client_id) else {
                continue;
            };
            sub.topics.remove(name);
            match sub.enqueue(
                ServerFrame::topic_deleted(name),
                self.settings.backpressure_policy,
            ) {
                EnqueueOutcome::Disconnected | EnqueueOutcome::TransportClosed => {
                    gone.push(client_id.clone());
                }
                EnqueueOutcome::Enqueued | EnqueueOutcome::DroppedOldest => {}
            }
        }
        for client_id in &gone {
            self.remove_subscriber(client_id);
        }

        info!(
            topic = name,
            detached = topic.subscribers.len(),
            "topic deleted"
        );
        Ok(name.to_string())
    }

    /// All topics with their subscriber counts, name-sorted.
    pub fn list_topics(&self) -> Vec<TopicSummary> {
        let mut out: Vec<TopicSummary> = self
            .topics
            .values()
            .map(|t| TopicSummary {
                name: t.name.clone(),
                subscribers: t.subscribers.len(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Join `client_id` to `topic`, creating the subscriber record on first
    /// subscribe. Re-subscribing an already-joined pair is a no-op on
    /// membership but still replays. If `last_n > 0`, the most recent
    /// `min(last_n, |history|)` events are enqueued in publish order.
    ///
    /// A record whose previous transport is closed is rebound to the new
    /// one, so a reconnecting client keeps its identity.
    pub fn subscribe(
        &mut self,
        client_id: &str,
        transport: TransportHandle,
        topic: &str,
        last_n: usize,
    ) -> Result<()> {
        let t = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;

        let max_queue = self.settings.max_queue_size;
        let sub = match self.subscribers.entry(client_id.to_string()) {
            Entry::Occupied(entry) => {
                let s = entry.into_mut();
                if !s.transport.is_open() {
                    s.transport = transport;
                }
                s
            }
            Entry::Vacant(entry) => entry.insert(Subscriber::new(client_id, transport, max_queue)),
        };

        t.subscribe(client_id.to_string());
        sub.topics.insert(topic.to_string());

        let mut dead = false;
        if last_n > 0 {
            for event in t.replay(last_n) {
                match sub.enqueue(ServerFrame::Event(event), self.settings.backpressure_policy) {
                    EnqueueOutcome::Disconnected | EnqueueOutcome::TransportClosed => {
                        dead = true;
                        break;
                    }
                    EnqueueOutcome::Enqueued | EnqueueOutcome::DroppedOldest => {}
                }
            }
        }

        debug!(client_id, topic, last_n, "subscribed");
        if dead {
            self.remove_subscriber(client_id);
        }
        Ok(())
    }

    /// Remove the `(client_id, topic)` membership on both sides.
    pub fn unsubscribe(&mut self, client_id: &str, topic: &str) -> Result<()> {
        let t = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;

        if !t.unsubscribe(&client_id.to_string()) {
            return Err(BrokerError::SubscriptionNotFound {
                client_id: client_id.to_string(),
                topic: topic.to_string(),
            });
        }
        if let Some(sub) = self.subscribers.get_mut(client_id) {
            sub.topics.remove(topic);
        }
        debug!(client_id, topic, "unsubscribed");
        Ok(())
    }

    /// Publish `message` to `topic`: stamp it, append it to the replay
    /// ring, and enqueue it to every joined subscriber. Recipients that
    /// overflow under DISCONNECT or whose transport is closed are reported
    /// in the receipt and removed; the rest still get the event.
    pub fn publish(&mut self, topic: &str, message: EventMessage) -> Result<PublishReceipt> {
        let t = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::TopicNotFound(topic.to_string()))?;

        let event = Event::new(topic, message);
        t.record(event.clone());
        let recipients: Vec<SubscriberId> = t.subscribers.iter().cloned().collect();

        let mut receipt = PublishReceipt {
            subscribers_reached: 0,
            failed: Vec::new(),
        };
        let mut gone = Vec::new();

        for client_id in recipients {
            let Some(sub) = self.subscribers.get_mut(&client_id) else {
                warn!(%client_id, topic, "topic references unknown subscriber");
                continue;
            };
            match sub.enqueue(
                ServerFrame::Event(event.clone()),
                self.settings.backpressure_policy,
            ) {
                EnqueueOutcome::Enqueued | EnqueueOutcome::DroppedOldest => {
                    receipt.subscribers_reached += 1;
                }
                EnqueueOutcome::Disconnected => {
                    receipt.failed.push(FailedDelivery {
                        client_id: client_id.clone(),
                        reason: FailureReason::SlowConsumer,
                    });
                    gone.push(client_id);
                }
                EnqueueOutcome::TransportClosed => {
                    receipt.failed.push(FailedDelivery {
                        client_id: client_id.clone(),
                        reason: FailureReason::TransportClosed,
                    });
                    gone.push(client_id);
                }
            }
        }
        for client_id in &gone {
            self.remove_subscriber(client_id);
        }

        debug!(
            topic,
            reached = receipt.subscribers_reached,
            failed = receipt.failed.len(),
            "published"
        );
        Ok(receipt)
    }

    /// Re-attempt delivery of queued frames for one subscriber. Called by
    /// the session send loop after each successful transport write, outside
    /// the enqueue path. Removes the record if the transport is gone.
    pub fn drain_subscriber(&mut self, client_id: &str) {
        if let Some(sub) = self.subscribers.get_mut(client_id) {
            if !sub.drain() {
                self.remove_subscriber(client_id);
            }
        }
    }

    /// Frames still queued for `client_id` (0 for unknown ids). Used by the
    /// shutdown drain to decide when a session is flushed.
    pub fn pending_frames(&self, client_id: &str) -> usize {
        self.subscribers
            .get(client_id)
            .map(|s| s.pending())
            .unwrap_or(0)
    }

    /// Whether `client_id`'s record is currently bound to `transport`'s
    /// session. False for unknown ids and for records a `subscribe` left
    /// bound to an earlier, still-open transport.
    pub fn is_bound_to(&self, client_id: &str, transport: &TransportHandle) -> bool {
        self.subscribers
            .get(client_id)
            .is_some_and(|s| s.transport.same_session(transport))
    }

    /// Remove `client_id` only if its record is still bound to
    /// `transport`'s session. A closing session must not tear down a
    /// record that belongs to (or was rebound to) another transport for
    /// the same client identity.
    pub fn remove_subscriber_if_bound(&mut self, client_id: &str, transport: &TransportHandle) {
        if self.is_bound_to(client_id, transport) {
            self.remove_subscriber(client_id);
        }
    }

    /// Remove a subscriber from every topic it joined and discard the
    /// record. Invoked on transport close, heartbeat death, or a
    /// DISCONNECT backpressure event. Unknown ids are a no-op.
    pub fn remove_subscriber(&mut self, client_id: &str) {
        let Some(sub) = self.subscribers.remove(client_id) else {
            return;
        };
        for topic in &sub.topics {
            if let Some(t) = self.topics.get_mut(topic) {
                t.unsubscribe(&sub.client_id);
            }
        }
        info!(client_id, "subscriber removed");
    }

    pub fn get_health(&self) -> Health {
        Health {
            uptime_sec: self.started_at.elapsed().as_secs(),
            topics: self.topics.len(),
            subscribers: self.subscribers.len(),
        }
    }

    /// Per-topic publish and subscriber counts, name-keyed and sorted.
    pub fn get_stats(&self) -> BTreeMap<String, TopicStats> {
        self.topics
            .iter()
            .map(|(name, t)| {
                (
                    name.clone(),
                    TopicStats {
                        messages: t.message_count(),
                        subscribers: t.subscribers.len(),
                    },
                )
            })
            .collect()
    }
}
