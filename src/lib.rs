//! # Ship Simulator
//!
//! A networked control-environment simulator: independently clocked devices
//! exchanging messages over an in-memory topic bus, driven remotely through a
//! newline-delimited JSON protocol over TCP.
//!
//! ## Features
//!
//! - **Device runtime**: a registry that owns devices, routes addressed messages
//!   and ticks every active device from one shared clock
//! - **Topic bus**: publish/subscribe fan-out with per-subscriber failure isolation
//! - **Wire protocol**: JSON batches, per-message success/error responses,
//!   `__heartbeat__` and `__kill__` sentinels
//! - **Connection health**: keepalives and bounded automatic reconnection
//! - **Built-in devices**: echo, logger and a noisy sensor
//!
//! ## Quick Start
//!
//! ```rust
//! use shipsim::device::Logger;
//! use shipsim::protocol::Value;
//! use shipsim::{Message, Ship};
//!
//! let ship = Ship::new();
//! let logger = Logger::new("logger1");
//! let values = logger.values();
//! ship.register_device(Box::new(logger)).unwrap();
//!
//! let message = Message::new("logger1", vec![Value::from(3.5), Value::from("ok")], "doc");
//! ship.handle_message(&message).unwrap();
//! assert_eq!(values.last(), Some(3.5));
//! ```
//!
//! ## Architecture
//!
//! - [`ship`] - Device registry and tick scheduler
//! - [`bus`] - Topic registry and fan-out
//! - [`device`] - Device contract and built-in devices
//! - [`protocol`] - Wire format
//! - [`server`] - TCP service routing inbound batches to a ship
//! - [`client`] - Operator side with local commands
//! - [`health`] - Keepalive and reconnection state machine
//! - [`commands`] - `/` command parsing
//! - [`config`] - Runtime settings and device records

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod bus;
pub mod client;
pub mod commands;
pub mod config;
pub mod device;
pub mod health;
pub mod protocol;
pub mod server;
pub mod ship;

pub use bus::{MessageBus, PublishReport};
pub use client::Client;
pub use device::{Device, DeviceError, Message, Publisher};
pub use health::{ConnectionState, HealthEvent, HealthMonitor};
pub use server::Server;
pub use ship::{Ship, ShipError};
