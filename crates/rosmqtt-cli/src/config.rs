//! Bridge configuration – reads `~/.rosmqtt/config.toml`.
//!
//! Every field has a default, so an absent file or an empty one yields a
//! bridge between `localhost:1883` and `ws://localhost:9090` that only
//! listens on the `rosbridge` control topic.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rosmqtt_middleware::{
    BootstrapPlan, InboundRoute, MqttSettings, OutboundSubscription, RosbridgeClient,
};
use rosmqtt_types::ProtocolParameters;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// MQTT broker section.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub qos: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_packet_size: Option<usize>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        let settings = MqttSettings::default();
        Self {
            host: settings.host,
            port: settings.port,
            client_id: settings.client_id,
            username: None,
            password: None,
            keep_alive_secs: settings.keep_alive.as_secs(),
            connect_timeout_secs: settings.connect_timeout.as_secs(),
            qos: settings.qos,
            max_packet_size: None,
        }
    }
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("qos", &self.qos)
            .field("max_packet_size", &self.max_packet_size)
            .finish()
    }
}

/// rosbridge server section.  The protocol parameters sit next to `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosbridgeConfig {
    pub url: String,
    #[serde(flatten)]
    pub protocol: ProtocolParameters,
}

impl Default for RosbridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9090".to_string(),
            protocol: ProtocolParameters::default(),
        }
    }
}

/// `[[inbound]]` – an MQTT topic mirrored into ROS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundConfig {
    pub mqtt_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ros_topic: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
}

/// `[[outbound]]` – a ROS topic mirrored onto MQTT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundConfig {
    pub ros_topic: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_rate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<u64>,
}

/// Persisted bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// MQTT topic carrying complete rosbridge operations.
    pub control_topic: String,

    /// Decode JSON-encoded `msg.data` strings on the way into ROS.
    pub double_decode: bool,

    pub mqtt: MqttConfig,
    pub rosbridge: RosbridgeConfig,
    pub inbound: Vec<InboundConfig>,
    pub outbound: Vec<OutboundConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_topic: "rosbridge".to_string(),
            double_decode: true,
            mqtt: MqttConfig::default(),
            rosbridge: RosbridgeConfig::default(),
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }
}

impl Config {
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.mqtt.connect_timeout_secs),
            qos: self.mqtt.qos,
            max_packet_size: self.mqtt.max_packet_size,
        }
    }

    pub fn rosbridge_client(&self) -> RosbridgeClient {
        RosbridgeClient::new(self.rosbridge.url.clone(), self.rosbridge.protocol.clone())
    }

    pub fn bootstrap_plan(&self) -> BootstrapPlan {
        BootstrapPlan {
            control_topic: self.control_topic.clone(),
            inbound: self
                .inbound
                .iter()
                .map(|route| {
                    let mut r = InboundRoute::new(route.mqtt_topic.clone());
                    if let Some(ros_topic) = &route.ros_topic {
                        r = r.with_ros_topic(ros_topic.clone());
                    }
                    r.msg_type = route.msg_type.clone();
                    r
                })
                .collect(),
            outbound: self
                .outbound
                .iter()
                .map(|sub| OutboundSubscription {
                    ros_topic: sub.ros_topic.clone(),
                    msg_type: sub.msg_type.clone(),
                    throttle_rate: sub.throttle_rate,
                    queue_length: sub.queue_length,
                })
                .collect(),
        }
    }
}

/// Return the path to `~/.rosmqtt/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rosmqtt").join("config.toml")
}

/// Load the config from `path` and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROSMQTT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROSMQTT_MQTT_HOST` | `mqtt.host` |
/// | `ROSMQTT_MQTT_PORT` | `mqtt.port` |
/// | `ROSMQTT_MQTT_USERNAME` | `mqtt.username` |
/// | `ROSMQTT_MQTT_PASSWORD` | `mqtt.password` |
/// | `ROSMQTT_ROSBRIDGE_URL` | `rosbridge.url` |
/// | `ROSMQTT_CONTROL_TOPIC` | `control_topic` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from<F>(cfg: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("ROSMQTT_MQTT_HOST") {
        cfg.mqtt.host = v;
    }
    if let Some(v) = lookup("ROSMQTT_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Some(v) = lookup("ROSMQTT_MQTT_USERNAME") {
        cfg.mqtt.username = Some(v);
    }
    if let Some(v) = lookup("ROSMQTT_MQTT_PASSWORD") {
        cfg.mqtt.password = Some(v);
    }
    if let Some(v) = lookup("ROSMQTT_ROSBRIDGE_URL") {
        cfg.rosbridge.url = v;
    }
    if let Some(v) = lookup("ROSMQTT_CONTROL_TOPIC") {
        cfg.control_topic = v;
    }
}
