//! In-memory topic registry with best-effort fan-out.

use crate::device::{DeviceSlot, Message, Topic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid topic name {0:?}")]
    InvalidTopic(String),
    #[error("message bus is no longer available")]
    Closed,
}

/// Outcome of one fan-out. Failures have already been logged per subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

type Subscribers = HashMap<String, Arc<DeviceSlot>>;

/// Topic → subscriber table.
///
/// A topic exists only while it has subscribers. Delivery works from a
/// snapshot of the subscriber set, so no bus lock is held while devices run.
#[derive(Debug, Default)]
pub struct MessageBus {
    subscribers: RwLock<HashMap<Topic, Subscribers>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: subscribing the same device twice has no further effect.
    pub fn subscribe(&self, topic: &str, slot: Arc<DeviceSlot>) -> Result<(), BusError> {
        if topic.trim().is_empty() {
            return Err(BusError::InvalidTopic(topic.to_string()));
        }

        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .entry(slot.id().to_string())
            .or_insert(slot);
        Ok(())
    }

    /// Returns whether the device was subscribed.
    pub fn unsubscribe(&self, topic: &str, device_id: &str) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(subs) = subscribers.get_mut(topic) else {
            return false;
        };

        let removed = subs.remove(device_id).is_some();
        if subs.is_empty() {
            subscribers.remove(topic);
        }
        removed
    }

    /// Deliver to every current subscriber of `topic`, in no particular order.
    /// A topic without subscribers is a no-op.
    pub fn publish(&self, topic: &str, message: &Message) -> PublishReport {
        let targets: Vec<Arc<DeviceSlot>> = {
            let subscribers = self.subscribers.read();
            let Some(subs) = subscribers.get(topic) else {
                return PublishReport::default();
            };
            let targets: Vec<Arc<DeviceSlot>> = subs.values().cloned().collect();
            targets
        };

        deliver_all(&targets, message, topic)
    }

    /// Deliver once to every device subscribed to any topic.
    pub fn broadcast(&self, message: &Message) -> PublishReport {
        let targets: Vec<Arc<DeviceSlot>> = {
            let subscribers = self.subscribers.read();
            let mut unique: HashMap<&str, &Arc<DeviceSlot>> = HashMap::new();
            for slot in subscribers.values().flat_map(|subs| subs.values()) {
                unique.entry(slot.id()).or_insert(slot);
            }
            let targets: Vec<Arc<DeviceSlot>> = unique.into_values().cloned().collect();
            targets
        };

        deliver_all(&targets, message, "*")
    }

    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.subscribers.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.read().get(topic).map_or(0, HashMap::len)
    }

    pub fn is_subscribed(&self, topic: &str, device_id: &str) -> bool {
        self.subscribers
            .read()
            .get(topic)
            .is_some_and(|subs| subs.contains_key(device_id))
    }
}

fn deliver_all(targets: &[Arc<DeviceSlot>], message: &Message, topic: &str) -> PublishReport {
    let mut report = PublishReport::default();
    for slot in targets {
        match slot.deliver(message) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                warn!(device = %slot.id(), topic, error = %e, "error handling message");
            }
        }
    }
    report
}
