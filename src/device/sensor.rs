use super::{Device, DeviceError, Message, Publisher, Topic};
use crate::protocol::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

pub const SENSOR_TOPIC: &str = "sensors";
pub const DEFAULT_SENSOR_INTERVAL: Duration = Duration::from_secs(1);

/// Read-only device that drifts by bounded noise on every tick.
///
/// A reading is published only once the value has moved more than half the
/// noise bound away from the last published value.
#[derive(Debug)]
pub struct Sensor {
    id: String,
    value: f64,
    noise: f64,
    last_published: f64,
    interval: Duration,
    rng: StdRng,
    publisher: Option<Publisher>,
}

impl Sensor {
    pub fn new(id: impl Into<String>, initial_value: f64, noise: f64) -> Self {
        Self::with_rng(id, initial_value, noise, StdRng::from_entropy())
    }

    /// Deterministic noise sequence, for reproducible runs.
    pub fn with_seed(id: impl Into<String>, initial_value: f64, noise: f64, seed: u64) -> Self {
        Self::with_rng(id, initial_value, noise, StdRng::seed_from_u64(seed))
    }

    fn with_rng(id: impl Into<String>, initial_value: f64, noise: f64, rng: StdRng) -> Self {
        Self {
            id: id.into(),
            value: initial_value,
            noise: noise.abs(),
            last_published: initial_value,
            interval: DEFAULT_SENSOR_INTERVAL,
            rng,
            publisher: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn last_published(&self) -> f64 {
        self.last_published
    }

    pub fn noise(&self) -> f64 {
        self.noise
    }
}

impl Device for Sensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle_input(&mut self, _message: &Message) -> Result<(), DeviceError> {
        Ok(())
    }

    fn tick(&mut self) -> Result<(), DeviceError> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or_else(|| DeviceError::Other(format!("sensor {} is not attached to a bus", self.id)))?;

        self.value += self.rng.gen_range(-1.0..=1.0) * self.noise;

        if (self.value - self.last_published).abs() > self.noise / 2.0 {
            self.last_published = self.value;
            publisher.publish(
                SENSOR_TOPIC,
                Message::new(self.id.clone(), vec![Value::Number(self.value)], self.id.clone()),
            );
            debug!(device = %self.id, "sensor reading {:.2}", self.value);
        }

        Ok(())
    }

    fn topics(&self) -> BTreeSet<Topic> {
        BTreeSet::from([SENSOR_TOPIC.to_string()])
    }

    fn tick_interval(&self) -> Duration {
        self.interval
    }

    fn attach(&mut self, publisher: Publisher) {
        self.publisher = Some(publisher);
    }
}
