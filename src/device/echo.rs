use super::{Device, DeviceError, Message, Recorder, Topic};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::info;

/// Passive device that reports every message it receives, verbatim.
#[derive(Debug)]
pub struct Echo {
    id: String,
    received: Recorder<Message>,
}

impl Echo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            received: Recorder::default(),
        }
    }

    pub fn received(&self) -> Recorder<Message> {
        self.received.clone()
    }
}

impl Device for Echo {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle_input(&mut self, message: &Message) -> Result<(), DeviceError> {
        info!(
            device = %self.id,
            target = %message.id,
            source = %message.source,
            values = ?message.values,
            "echo received"
        );
        self.received.push(message.clone());
        Ok(())
    }

    fn tick(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn topics(&self) -> BTreeSet<Topic> {
        BTreeSet::new()
    }

    fn tick_interval(&self) -> Duration {
        Duration::ZERO
    }
}
