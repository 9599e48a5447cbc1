//! `rosmqtt-types` – wire data model shared by the bridge crates.
//!
//! The primary fabric (ROS, reached through the rosbridge protocol) speaks
//! JSON envelopes of the form `{op, topic, msg, type?}`.  The secondary
//! fabric (MQTT) carries raw byte payloads with no envelope at all.  The
//! types in this crate describe both sides and the conversions between them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Operation carried in the `op` field of a rosbridge envelope.
///
/// Unknown operations are preserved verbatim in [`OpKind::Other`] so that
/// the bridge can relay them without understanding them; validating `op` is
/// the protocol server's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OpKind {
    Publish,
    Subscribe,
    Unsubscribe,
    Advertise,
    Unadvertise,
    Status,
    Fragment,
    Other(String),
}

impl OpKind {
    pub fn as_str(&self) -> &str {
        match self {
            OpKind::Publish => "publish",
            OpKind::Subscribe => "subscribe",
            OpKind::Unsubscribe => "unsubscribe",
            OpKind::Advertise => "advertise",
            OpKind::Unadvertise => "unadvertise",
            OpKind::Status => "status",
            OpKind::Fragment => "fragment",
            OpKind::Other(op) => op,
        }
    }
}

impl From<String> for OpKind {
    fn from(op: String) -> Self {
        match op.as_str() {
            "publish" => OpKind::Publish,
            "subscribe" => OpKind::Subscribe,
            "unsubscribe" => OpKind::Unsubscribe,
            "advertise" => OpKind::Advertise,
            "unadvertise" => OpKind::Unadvertise,
            "status" => OpKind::Status,
            "fragment" => OpKind::Fragment,
            _ => OpKind::Other(op),
        }
    }
}

impl From<OpKind> for String {
    fn from(op: OpKind) -> Self {
        match op {
            OpKind::Other(op) => op,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `msg` value of an envelope.
///
/// rosbridge messages are JSON objects; publishers on the MQTT side may also
/// send opaque text, which is carried as [`MessageValue::Plain`].  Any other
/// JSON shape (numbers, arrays, `null`) is rejected when decoding an
/// envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageValue {
    Plain(String),
    Structured(Map<String, Value>),
}

impl MessageValue {
    /// Decode an MQTT payload.
    ///
    /// Text that parses as a JSON object becomes [`MessageValue::Structured`];
    /// any other text, including JSON scalars and arrays, is kept verbatim as
    /// [`MessageValue::Plain`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] when the payload is not valid UTF-8.
    pub fn from_payload(payload: &[u8]) -> Result<Self, BridgeError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| BridgeError::Decode(format!("payload is not valid UTF-8: {e}")))?;
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(MessageValue::Structured(map)),
            _ => Ok(MessageValue::Plain(text.to_string())),
        }
    }

    /// Encode the value as an MQTT payload.
    ///
    /// Plain strings are sent as their UTF-8 bytes; structured values are
    /// serialised in full as compact JSON.
    pub fn to_payload(&self) -> Result<Vec<u8>, BridgeError> {
        match self {
            MessageValue::Plain(text) => Ok(text.as_bytes().to_vec()),
            MessageValue::Structured(map) => serde_json::to_vec(map)
                .map_err(|e| BridgeError::Serialization(e.to_string())),
        }
    }

    /// Look up a top-level field.  Always `None` for plain strings.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            MessageValue::Plain(_) => None,
            MessageValue::Structured(map) => map.get(key),
        }
    }

    /// Return the message header, if the message carries one.
    ///
    /// * `None` – the message is plain text or has no `header` field.
    /// * `Some(Err(_))` – a `header` field exists but does not have the
    ///   `{frame_id, seq, stamp: {secs, nsecs}}` shape.
    pub fn header(&self) -> Option<Result<Header, BridgeError>> {
        let raw = self.get("header")?;
        Some(
            Header::deserialize(raw)
                .map_err(|e| BridgeError::Header(format!("malformed header: {e}"))),
        )
    }

    /// Replace a JSON-encoded `data` string with the structure it encodes.
    ///
    /// Publishers that stringify their payload before placing it in the
    /// generic `data` field (the `std_msgs/String` convention) get it
    /// unwrapped here.  Only strings that decode to a JSON object or array
    /// are replaced; scalars and unparsable text are left untouched.
    ///
    /// Returns `true` when a replacement happened.
    pub fn double_decode_data(&mut self) -> bool {
        let MessageValue::Structured(map) = self else {
            return false;
        };
        let Some(Value::String(encoded)) = map.get("data") else {
            return false;
        };
        match serde_json::from_str::<Value>(encoded) {
            Ok(decoded @ (Value::Object(_) | Value::Array(_))) => {
                map.insert("data".to_string(), decoded);
                true
            }
            _ => false,
        }
    }
}

impl From<Map<String, Value>> for MessageValue {
    fn from(map: Map<String, Value>) -> Self {
        MessageValue::Structured(map)
    }
}

impl From<&str> for MessageValue {
    fn from(text: &str) -> Self {
        MessageValue::Plain(text.to_string())
    }
}

/// A rosbridge protocol envelope.
///
/// Keys the bridge does not interpret (`id`, `throttle_rate`,
/// `queue_length`, `compression`, ...) are kept in `extra` and written back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: OpKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<MessageValue>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    fn new(op: OpKind, topic: impl Into<String>) -> Self {
        Self {
            op,
            topic: topic.into(),
            msg: None,
            msg_type: None,
            extra: Map::new(),
        }
    }

    /// `{"op": "publish", "topic": .., "msg": ..}`
    pub fn publish(topic: impl Into<String>, msg: MessageValue) -> Self {
        Self {
            msg: Some(msg),
            ..Self::new(OpKind::Publish, topic)
        }
    }

    /// `{"op": "subscribe", "topic": .., "type"?: ..}`
    pub fn subscribe(topic: impl Into<String>, msg_type: Option<String>) -> Self {
        Self {
            msg_type,
            ..Self::new(OpKind::Subscribe, topic)
        }
    }

    /// `{"op": "advertise", "topic": .., "type": ..}`
    pub fn advertise(topic: impl Into<String>, msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: Some(msg_type.into()),
            ..Self::new(OpKind::Advertise, topic)
        }
    }

    /// Attach an uninterpreted key (e.g. `throttle_rate`).
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::Decode(format!("invalid envelope: {e}")))
    }

    pub fn from_value(value: Value) -> Result<Self, BridgeError> {
        serde_json::from_value(value)
            .map_err(|e| BridgeError::Decode(format!("invalid envelope: {e}")))
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Serialization(e.to_string()))
    }
}

/// Message timestamp as carried in a ROS header.
///
/// ROS 1 names the fields `secs`/`nsecs`; ROS 2 uses `sec`/`nanosec`.  Both
/// spellings are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(alias = "sec")]
    pub secs: i64,
    #[serde(alias = "nanosec")]
    pub nsecs: i64,
}

impl Stamp {
    /// POSIX time in seconds: `secs + nsecs * 1e-9`.
    pub fn to_epoch(&self) -> f64 {
        self.secs as f64 + self.nsecs as f64 * 1e-9
    }

    /// Split a POSIX time into whole seconds and the nanosecond remainder.
    pub fn from_epoch(epoch: f64) -> Self {
        let secs = epoch.floor();
        Self {
            secs: secs as i64,
            nsecs: ((epoch - secs) * 1e9) as i64,
        }
    }
}

/// `std_msgs/Header`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub frame_id: String,
    #[serde(default)]
    pub seq: u64,
    pub stamp: Stamp,
}

/// Forwarding direction, used to tag log lines and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    MqttToRos,
    RosToMqtt,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::MqttToRos => f.write_str("MQTT→ROS"),
            Direction::RosToMqtt => f.write_str("ROS→MQTT"),
        }
    }
}

/// Settings handed to the rosbridge protocol collaborator unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParameters {
    /// Seconds before an incomplete fragmented message is discarded.
    pub fragment_timeout: f64,
    /// Seconds to wait between consecutive frames; `0` disables throttling.
    pub delay_between_messages: f64,
    /// Largest message accepted, in bytes; `None` disables the limit.
    pub max_message_size: Option<usize>,
    /// Seconds before an unused publisher is unregistered.
    pub unregister_timeout: f64,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            fragment_timeout: 600.0,
            delay_between_messages: 0.0,
            max_message_size: None,
            unregister_timeout: 10.0,
        }
    }
}

/// Errors raised while translating or forwarding a single message, or while
/// bringing the bridge up.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Header Error: {0}")]
    Header(String),

    #[error("Forwarding Error: {0}")]
    Forward(String),

    #[error("Bootstrap Error: {0}")]
    Bootstrap(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}
