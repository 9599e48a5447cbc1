//! Seams between the forwarding engine and the two transports.
//!
//! The adapters never talk to `rumqttc` or a WebSocket directly.  They are
//! handed trait objects at construction time, which keeps them testable with
//! recording fakes and lets the concrete clients live in [`crate::mqtt`] and
//! [`crate::rosbridge`].

use async_trait::async_trait;
use rosmqtt_types::BridgeError;

/// Publishing half of the MQTT client.
///
/// `publish` must not block: implementations enqueue the message and return.
pub trait MqttPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;
}

/// Full MQTT client surface needed at startup.
#[async_trait]
pub trait MqttTransport: MqttPublisher {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError>;
}

/// Ingestion entry point of the rosbridge protocol.
///
/// Receives a JSON-encoded operation; validating `op` and fanning the message
/// out to ROS subscribers happens on the other side.
pub trait ProtocolIngest: Send + Sync {
    fn incoming(&self, envelope_text: String) -> Result<(), BridgeError>;
}
