use super::{Device, DeviceError, Message, Recorder, Topic};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::info;

pub const LOGGER_TOPIC: &str = "logger";

/// Passive device that accumulates every numeric value it receives.
#[derive(Debug)]
pub struct Logger {
    id: String,
    values: Recorder<f64>,
}

impl Logger {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: Recorder::default(),
        }
    }

    /// Read-only handle to the accumulated values, in arrival order.
    pub fn values(&self) -> Recorder<f64> {
        self.values.clone()
    }
}

impl Device for Logger {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle_input(&mut self, message: &Message) -> Result<(), DeviceError> {
        for value in message.numbers() {
            self.values.push(value);
            info!(device = %self.id, "logger received value: {:.2}", value);
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn topics(&self) -> BTreeSet<Topic> {
        BTreeSet::from([LOGGER_TOPIC.to_string()])
    }

    fn tick_interval(&self) -> Duration {
        Duration::ZERO
    }
}
