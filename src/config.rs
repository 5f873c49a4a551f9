use crate::health::HealthConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TICK_RESOLUTION: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Period of the shared scheduler clock.
    pub tick_resolution: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            tick_resolution: DEFAULT_TICK_RESOLUTION,
        }
    }
}

/// What `/connect` does while the transport is still up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectPolicy {
    #[default]
    RejectWhenConnected,
    IgnoreWhenConnected,
}

impl std::str::FromStr for ConnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(ConnectPolicy::RejectWhenConnected),
            "ignore" => Ok(ConnectPolicy::IgnoreWhenConnected),
            other => Err(format!("unknown connect policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub health: HealthConfig,
    pub connect_policy: ConnectPolicy,
    pub devices: Vec<DeviceConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            health: HealthConfig::default(),
            connect_policy: ConnectPolicy::default(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Checkbox,
    Selector,
    Input,
}

/// Externally supplied description of one operator-facing device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl DeviceConfig {
    pub fn describe(&self) -> String {
        let kind = match self.kind {
            ControlKind::Checkbox => "checkbox",
            ControlKind::Selector => "selector",
            ControlKind::Input => "input",
        };
        if self.options.is_empty() {
            format!("{} ({}) [{}]", self.label, self.id, kind)
        } else {
            format!(
                "{} ({}) [{}: {}]",
                self.label,
                self.id,
                kind,
                self.options.join(", ")
            )
        }
    }
}
