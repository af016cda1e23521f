//! In-process publish/subscribe bus.
//!
//! Each subscription owns a bounded mpsc channel. `publish` awaits delivery
//! to every current subscriber, so successive publishes from one caller
//! arrive in order. A subscriber whose buffer stays full past the retry
//! ceiling gets the message dead-lettered instead.

use super::payload::DeadLetter;
use super::{AgentMessage, Backoff, MessageKind, topics};
use crate::config::TransportConfig;
use crate::error::{FlowError, Result};
use futures::Stream;
use futures::future::join_all;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

const BUS_SENDER: &str = "bus";

#[derive(Clone)]
struct Slot {
    id: u64,
    sender: mpsc::Sender<AgentMessage>,
}

enum Delivery {
    Delivered,
    Closed,
    Exhausted(u32),
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: String,
    pub topic: String,
    pub delivered: usize,
    pub dead_lettered: usize,
}

/// Counters since the bus was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
}

pub struct MessageBus {
    topics: RwLock<HashMap<String, Vec<Slot>>>,
    next_subscriber: AtomicU64,
    capacity: usize,
    max_attempts: u32,
    backoff: Backoff,
    closed: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    dead_lettered: AtomicU64,
}

impl MessageBus {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            capacity: config.subscriber_capacity.max(1),
            max_attempts: config.max_delivery_attempts.max(1),
            backoff: config.backoff().with_jitter(),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Register a subscriber. Only messages published after this call are seen.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        if !self.closed.load(Ordering::Acquire) {
            let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
            topics
                .entry(topic.to_string())
                .or_default()
                .push(Slot { id, sender });
        }

        debug!(topic, subscriber = id, "subscribed");
        Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        }
    }

    /// Deliver `message` to every current subscriber of `topic`.
    ///
    /// Deliveries that exhaust the retry ceiling are routed to
    /// [`topics::DEAD_LETTER`] and counted in the receipt.
    pub async fn publish(&self, topic: &str, message: AgentMessage) -> Result<PublishReceipt> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FlowError::Transport(format!(
                "message bus is shut down; cannot publish to '{}'",
                topic
            )));
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        let (delivered, exhausted) = self.fan_out(topic, &message).await;
        let receipt = PublishReceipt {
            message_id: message.id.clone(),
            topic: topic.to_string(),
            delivered,
            dead_lettered: exhausted.len(),
        };

        for (subscriber, attempts) in exhausted {
            self.dead_letter(topic, subscriber, attempts, &message).await;
        }

        debug!(
            topic,
            message_id = %message.id,
            kind = %message.message_type,
            delivered = receipt.delivered,
            "published"
        );
        Ok(receipt)
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|slots| slots.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Drop every subscriber and refuse further publishes. Open
    /// subscriptions drain their buffers and then end.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliver to all subscribers concurrently. Returns the delivered count
    /// and the subscribers whose delivery was exhausted.
    async fn fan_out(&self, topic: &str, message: &AgentMessage) -> (usize, Vec<(u64, u32)>) {
        let slots = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            topics.get(topic).cloned().unwrap_or_default()
        };
        if slots.is_empty() {
            return (0, Vec::new());
        }

        let outcomes = join_all(slots.iter().map(|slot| self.deliver(slot, message))).await;

        let mut delivered = 0;
        let mut closed = Vec::new();
        let mut exhausted = Vec::new();
        for (slot, outcome) in slots.iter().zip(outcomes) {
            match outcome {
                Delivery::Delivered => {
                    delivered += 1;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Delivery::Closed => closed.push(slot.id),
                Delivery::Exhausted(attempts) => exhausted.push((slot.id, attempts)),
            }
        }

        if !closed.is_empty() {
            self.prune(topic, &closed);
        }
        (delivered, exhausted)
    }

    async fn deliver(&self, slot: &Slot, message: &AgentMessage) -> Delivery {
        for attempt in 0..self.max_attempts {
            match slot.sender.try_send(message.clone()) {
                Ok(()) => return Delivery::Delivered,
                Err(TrySendError::Closed(_)) => return Delivery::Closed,
                Err(TrySendError::Full(_)) => {
                    if attempt + 1 < self.max_attempts {
                        let delay = self.backoff.delay(attempt);
                        debug!(
                            subscriber = slot.id,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "subscriber buffer full, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Delivery::Exhausted(self.max_attempts)
    }

    async fn dead_letter(&self, topic: &str, subscriber: u64, attempts: u32, message: &AgentMessage) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        warn!(
            topic,
            subscriber,
            attempts,
            message_id = %message.id,
            correlation_id = message.correlation_id(),
            "delivery exhausted, routing to dead-letter topic"
        );

        if topic == topics::DEAD_LETTER {
            return;
        }

        let letter = DeadLetter {
            topic: topic.to_string(),
            subscriber,
            attempts,
            reason: format!(
                "subscriber {} did not accept the message after {} attempts",
                subscriber, attempts
            ),
            original: Box::new(message.clone()),
        };
        let payload = match AgentMessage::encode(&letter) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode dead letter");
                return;
            }
        };
        let envelope = AgentMessage::correlated(
            MessageKind::Error,
            BUS_SENDER,
            topics::DEAD_LETTER,
            payload,
            message.correlation_id(),
        );

        let (_, dropped) = self.fan_out(topics::DEAD_LETTER, &envelope).await;
        for (subscriber, _) in dropped {
            warn!(subscriber, "dead-letter subscriber is not keeping up; letter dropped");
        }
    }

    fn prune(&self, topic: &str, ids: &[u64]) {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slots) = topics.get_mut(topic) {
            slots.retain(|slot| !ids.contains(&slot.id));
            if slots.is_empty() {
                topics.remove(topic);
            }
        }
        debug!(topic, pruned = ids.len(), "removed closed subscriptions");
    }
}

/// Ordered stream of messages for one subscriber.
pub struct Subscription {
    id: u64,
    topic: String,
    receiver: mpsc::Receiver<AgentMessage>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once cancelled/closed and drained.
    pub async fn recv(&mut self) -> Option<AgentMessage> {
        self.receiver.recv().await
    }

    /// Like [`Subscription::recv`], bounded by `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<AgentMessage>> {
        tokio::time::timeout(timeout, self.receiver.recv())
            .await
            .map_err(|_| {
                FlowError::Transport(format!(
                    "no message on '{}' within {}ms",
                    self.topic,
                    timeout.as_millis()
                ))
            })
    }

    pub fn try_recv(&mut self) -> Option<AgentMessage> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving. Buffered messages can still be drained.
    pub fn cancel(&mut self) {
        self.receiver.close();
    }
}

impl Stream for Subscription {
    type Item = AgentMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
