pub mod echo;
pub mod logger;
pub mod sensor;

pub use echo::Echo;
pub use logger::{Logger, LOGGER_TOPIC};
pub use sensor::{Sensor, SENSOR_TOPIC};

use crate::bus::{BusError, MessageBus};
use crate::protocol::{Value, WireMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::warn;

pub type Topic = String;

/// An addressed payload delivered to devices. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub values: Vec<Value>,
    pub time: SystemTime,
    pub source: String,
}

impl Message {
    pub fn new(id: impl Into<String>, values: Vec<Value>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values,
            time: SystemTime::now(),
            source: source.into(),
        }
    }

    pub fn from_wire(message: WireMessage, source: impl Into<String>) -> Self {
        Self::new(message.id, message.values, source)
    }

    pub fn numbers(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(Value::as_number)
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("failed to publish: {0}")]
    Publish(#[from] BusError),
    #[error("{0}")]
    Other(String),
}

/// Capability set every simulated device provides.
///
/// The registry only ever talks to devices through this trait. Calls into one
/// device instance are serialized, so implementations take `&mut self`.
pub trait Device: Send {
    fn id(&self) -> &str;

    fn handle_input(&mut self, message: &Message) -> Result<(), DeviceError>;

    fn tick(&mut self) -> Result<(), DeviceError>;

    /// Topics this device wants to receive.
    fn topics(&self) -> BTreeSet<Topic>;

    /// Zero marks a passive device that is never ticked.
    fn tick_interval(&self) -> Duration;

    /// Hands the device its publishing handle. Called once, at registration.
    fn attach(&mut self, publisher: Publisher) {
        let _ = publisher;
    }
}

/// A device's non-owning handle to the bus.
///
/// Publications are staged while the device runs and fanned out by the
/// runtime as soon as the current `tick`/`handle_input` returns, so no device
/// lock is held during delivery.
#[derive(Debug, Clone)]
pub struct Publisher {
    source: String,
    bus: Weak<MessageBus>,
    staged: Arc<Mutex<Vec<(Topic, Message)>>>,
}

impl Publisher {
    pub fn new(source: impl Into<String>, bus: &Arc<MessageBus>) -> Self {
        Self {
            source: source.into(),
            bus: Arc::downgrade(bus),
            staged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A publisher bound to no bus; staged messages are only observable via
    /// [`Publisher::take_staged`].
    pub fn detached(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bus: Weak::new(),
            staged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn publish(&self, topic: impl Into<Topic>, message: Message) {
        self.staged.lock().push((topic.into(), message));
    }

    pub fn take_staged(&self) -> Vec<(Topic, Message)> {
        std::mem::take(&mut *self.staged.lock())
    }

    /// Deliver everything staged so far through the bus.
    pub fn flush(&self) -> Result<usize, BusError> {
        let staged = self.take_staged();
        if staged.is_empty() {
            return Ok(0);
        }

        let bus = self.bus.upgrade().ok_or(BusError::Closed)?;
        let mut delivered = 0;
        for (topic, message) in staged {
            delivered += bus.publish(&topic, &message).delivered;
        }
        Ok(delivered)
    }
}

/// Registry-owned wrapper serializing access to one device instance.
pub struct DeviceSlot {
    id: String,
    topics: BTreeSet<Topic>,
    tick_interval: Duration,
    publisher: Publisher,
    device: Mutex<Box<dyn Device>>,
}

impl DeviceSlot {
    pub fn new(mut device: Box<dyn Device>, bus: &Arc<MessageBus>) -> Self {
        let id = device.id().to_string();
        let publisher = Publisher::new(id.clone(), bus);
        device.attach(publisher.clone());

        Self {
            topics: device.topics(),
            tick_interval: device.tick_interval(),
            id,
            publisher,
            device: Mutex::new(device),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topics(&self) -> &BTreeSet<Topic> {
        &self.topics
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn is_passive(&self) -> bool {
        self.tick_interval.is_zero()
    }

    pub fn deliver(&self, message: &Message) -> Result<(), DeviceError> {
        let result = self.device.lock().handle_input(message);
        self.flush(result)
    }

    pub fn tick(&self) -> Result<(), DeviceError> {
        let result = self.device.lock().tick();
        self.flush(result)
    }

    /// Publish what the device staged. The device's own error wins over a
    /// publish failure, which is then only logged.
    fn flush(&self, result: Result<(), DeviceError>) -> Result<(), DeviceError> {
        if let Err(e) = self.publisher.flush() {
            warn!(device = %self.id, error = %e, "failed to publish staged messages");
            result?;
            return Err(e.into());
        }
        result
    }
}

impl core::fmt::Debug for DeviceSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceSlot")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

/// Shared, read-only view over values a device accumulates.
#[derive(Debug)]
pub struct Recorder<T> {
    entries: Arc<RwLock<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub(crate) fn push(&self, entry: T) {
        self.entries.write().push(entry);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.entries.read().clone()
    }

    pub fn last(&self) -> Option<T> {
        self.entries.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
