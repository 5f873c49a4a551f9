use crate::bus::{BusError, MessageBus};
use crate::config::DEFAULT_TICK_RESOLUTION;
use crate::device::{Device, DeviceError, DeviceSlot, Message};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ShipError {
    #[error("device with ID {0} already exists")]
    DuplicateId(String),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("failed to subscribe device {id}: {source}")]
    Subscription {
        id: String,
        #[source]
        source: BusError,
    },
    #[error("device {id} failed: {source}")]
    Handler {
        id: String,
        #[source]
        source: DeviceError,
    },
}

const MIN_RESOLUTION: Duration = Duration::from_millis(1);

struct SchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Device registry and tick scheduler.
///
/// Owns every registered device. Each device is bound to the bus before it
/// becomes visible to lookups, and all devices are ticked from one shared
/// clock at `resolution`.
pub struct Ship {
    bus: Arc<MessageBus>,
    devices: RwLock<HashMap<String, Arc<DeviceSlot>>>,
    last_ticks: Mutex<HashMap<String, Instant>>,
    resolution: Duration,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl Ship {
    pub fn new() -> Self {
        Self::with_resolution(DEFAULT_TICK_RESOLUTION)
    }

    pub fn with_resolution(resolution: Duration) -> Self {
        Self::with_bus(Arc::new(MessageBus::new()), resolution)
    }

    pub fn with_bus(bus: Arc<MessageBus>, resolution: Duration) -> Self {
        Self {
            bus,
            devices: RwLock::new(HashMap::new()),
            last_ticks: Mutex::new(HashMap::new()),
            resolution: resolution.max(MIN_RESOLUTION),
            scheduler: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Add a device and subscribe it to its declared topics.
    ///
    /// Either the device ends up registered and fully subscribed, or nothing
    /// changes at all.
    pub fn register_device(&self, device: Box<dyn Device>) -> Result<(), ShipError> {
        let mut devices = self.devices.write();

        let id = device.id().to_string();
        if devices.contains_key(&id) {
            return Err(ShipError::DuplicateId(id));
        }

        let slot = Arc::new(DeviceSlot::new(device, &self.bus));
        let mut subscribed: Vec<&str> = Vec::new();
        for topic in slot.topics() {
            if let Err(source) = self.bus.subscribe(topic, Arc::clone(&slot)) {
                for done in &subscribed {
                    self.bus.unsubscribe(done, &id);
                }
                return Err(ShipError::Subscription { id, source });
            }
            subscribed.push(topic);
        }
        drop(subscribed);

        info!(
            device = %id,
            topics = ?slot.topics(),
            interval_ms = slot.tick_interval().as_millis() as u64,
            "device registered"
        );
        devices.insert(id, slot);
        Ok(())
    }

    /// Unsubscribe a device from all its topics and drop it.
    pub fn remove_device(&self, id: &str) -> Result<(), ShipError> {
        let slot = self
            .devices
            .write()
            .remove(id)
            .ok_or_else(|| ShipError::UnknownDevice(id.to_string()))?;

        for topic in slot.topics() {
            self.bus.unsubscribe(topic, id);
        }
        self.last_ticks.lock().remove(id);
        info!(device = %id, "device removed");
        Ok(())
    }

    /// Route a message to the device whose ID matches its target.
    pub fn handle_message(&self, message: &Message) -> Result<(), ShipError> {
        let slot = self
            .devices
            .read()
            .get(&message.id)
            .cloned()
            .ok_or_else(|| ShipError::UnknownDevice(message.id.clone()))?;

        slot.deliver(message).map_err(|source| ShipError::Handler {
            id: message.id.clone(),
            source,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// One pass of the scheduler: tick every active device whose own interval
    /// has elapsed since its last tick. Returns the number of ticks run.
    ///
    /// A device that has never been ticked is due immediately.
    pub fn sweep(&self, now: Instant) -> usize {
        let active: Vec<Arc<DeviceSlot>> = self
            .devices
            .read()
            .values()
            .filter(|slot| !slot.is_passive())
            .cloned()
            .collect();

        let due: Vec<Arc<DeviceSlot>> = {
            let mut last_ticks = self.last_ticks.lock();
            active
                .into_iter()
                .filter(|slot| {
                    let is_due = last_ticks.get(slot.id()).map_or(true, |last| {
                        now.saturating_duration_since(*last) >= slot.tick_interval()
                    });
                    if is_due {
                        last_ticks.insert(slot.id().to_string(), now);
                    }
                    is_due
                })
                .collect()
        };

        for slot in &due {
            if let Err(e) = slot.tick() {
                warn!(device = %slot.id(), error = %e, "error ticking device");
            }
        }
        due.len()
    }

    /// Launch the scheduler loop on the current tokio runtime. Calling this
    /// while the loop is already running has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let ship = Arc::clone(self);
        let task = tokio::spawn(async move { ship.run(stop_rx).await });
        *scheduler = Some(SchedulerHandle { stop, task });
        info!(resolution_ms = self.resolution.as_millis() as u64, "scheduler started");
    }

    /// Signal the scheduler to finish. Does not wait; a tick in progress
    /// completes normally.
    pub fn stop(&self) {
        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.stop.send(true);
            info!("scheduler stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut clock = time::interval(self.resolution);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = clock.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
        debug!("scheduler stopped");
    }
}

impl Default for Ship {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(Ship: Send, Sync);
static_assertions::assert_impl_all!(MessageBus: Send, Sync);
