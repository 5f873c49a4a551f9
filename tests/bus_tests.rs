use shipsim::bus::BusError;
use shipsim::device::{DeviceSlot, Echo, Logger, LOGGER_TOPIC};
use shipsim::protocol::Value;
use shipsim::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Subscribes to one topic and rejects everything it is given.
struct Faulty {
    id: String,
    topic: String,
}

impl Device for Faulty {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle_input(&mut self, message: &Message) -> Result<(), DeviceError> {
        Err(DeviceError::Rejected(format!("cannot handle {}", message.id)))
    }

    fn tick(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn topics(&self) -> BTreeSet<String> {
        BTreeSet::from([self.topic.clone()])
    }

    fn tick_interval(&self) -> Duration {
        Duration::ZERO
    }
}

fn slot(device: impl Device + 'static, bus: &Arc<MessageBus>) -> Arc<DeviceSlot> {
    Arc::new(DeviceSlot::new(Box::new(device), bus))
}

fn message(values: Vec<Value>) -> Message {
    Message::new("target", values, "test")
}

#[test]
fn test_publish_without_subscribers_is_noop() {
    let bus = MessageBus::new();

    let report = bus.publish("nobody", &message(vec![Value::from(1.0)]));

    assert_eq!(report, PublishReport::default());
    assert!(bus.topics().is_empty());
}

#[test]
fn test_failing_subscriber_does_not_block_others() {
    let bus = Arc::new(MessageBus::new());
    let logger = Logger::new("logger1");
    let values = logger.values();
    let faulty = Faulty {
        id: "faulty1".to_string(),
        topic: LOGGER_TOPIC.to_string(),
    };

    bus.subscribe(LOGGER_TOPIC, slot(faulty, &bus)).unwrap();
    bus.subscribe(LOGGER_TOPIC, slot(logger, &bus)).unwrap();

    let report = bus.publish(LOGGER_TOPIC, &message(vec![Value::from(2.5)]));

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.attempted(), 2);
    assert_eq!(values.snapshot(), vec![2.5]);
}

#[test]
fn test_broadcast_continues_past_failures() {
    let bus = Arc::new(MessageBus::new());
    let echo = Echo::new("echo1");
    let received = echo.received();
    let faulty = Faulty {
        id: "faulty1".to_string(),
        topic: "alerts".to_string(),
    };

    bus.subscribe("alerts", slot(faulty, &bus)).unwrap();
    bus.subscribe("status", slot(echo, &bus)).unwrap();

    let report = bus.broadcast(&message(vec![Value::from("all hands")]));

    assert_eq!(report.attempted(), 2);
    assert_eq!(report.failed, 1);
    assert_eq!(received.len(), 1);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let bus = Arc::new(MessageBus::new());
    let logger = Logger::new("logger1");
    let values = logger.values();
    bus.subscribe(LOGGER_TOPIC, slot(logger, &bus)).unwrap();

    bus.publish(LOGGER_TOPIC, &message(vec![Value::from(1.0)]));
    assert!(bus.unsubscribe(LOGGER_TOPIC, "logger1"));
    bus.publish(LOGGER_TOPIC, &message(vec![Value::from(2.0)]));

    assert_eq!(values.snapshot(), vec![1.0]);
    assert!(!bus.is_subscribed(LOGGER_TOPIC, "logger1"));
}

#[test]
fn test_blank_topic_rejected() {
    let bus = Arc::new(MessageBus::new());
    let echo = slot(Echo::new("echo1"), &bus);

    assert!(matches!(
        bus.subscribe("  ", echo),
        Err(BusError::InvalidTopic(_))
    ));
    assert!(bus.topics().is_empty());
}

#[test]
fn test_publisher_fails_once_bus_dropped() {
    let bus = Arc::new(MessageBus::new());
    let publisher = Publisher::new("sensor1", &bus);
    drop(bus);

    publisher.publish("sensors", message(vec![Value::from(1.0)]));

    assert!(matches!(publisher.flush(), Err(BusError::Closed)));
}
