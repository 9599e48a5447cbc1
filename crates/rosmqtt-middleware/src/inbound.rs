//! MQTT → ROS forwarding.
//!
//! [`InboundAdapter`] accepts two kinds of MQTT traffic:
//!
//! * **Control topic** (`rosbridge` by default) – the payload is a complete
//!   rosbridge operation (`{"op": .., "topic": .., "msg": ..}`).  It is
//!   relayed as is, whatever its `op`, so MQTT clients can also issue
//!   `subscribe` or `advertise` requests through the bridge.
//!
//! * **Mirrored topics** – the payload is a bare message body.  It is wrapped
//!   in a `publish` operation addressed to the route's ROS topic, with the
//!   payload itself as `msg`: `{"x":1}` on `T` becomes
//!   `{"op":"publish","topic":"T","msg":{"x":1}}`.
//!
//! Both the control topic and the mirrored topics may be MQTT filters
//! (`sensors/+`, `factory/#`); exact routes win over wildcard ones, and
//! wildcard routes are tried in configuration order.
//!
//! In both cases, when double-decoding is enabled, a `msg.data` string that
//! holds an encoded JSON object or array is replaced by the decoded value
//! before the operation is handed to the rosbridge protocol.

use std::sync::Arc;

use rosmqtt_types::{BridgeError, Envelope, MessageValue};
use serde_json::Value;
use tracing::{debug, trace};

use crate::adapter::ProtocolIngest;
use crate::bootstrap::InboundRoute;

/// Adapter from MQTT messages to rosbridge operations.
pub struct InboundAdapter {
    protocol: Arc<dyn ProtocolIngest>,
    control_topic: String,
    routes: Vec<InboundRoute>,
    double_decode: bool,
}

impl InboundAdapter {
    pub fn new(
        protocol: Arc<dyn ProtocolIngest>,
        control_topic: impl Into<String>,
        routes: impl IntoIterator<Item = InboundRoute>,
        double_decode: bool,
    ) -> Self {
        Self {
            protocol,
            control_topic: control_topic.into(),
            routes: routes.into_iter().collect(),
            double_decode,
        }
    }

    /// Translate an MQTT message and hand it to the rosbridge protocol.
    ///
    /// Returns the envelope that was forwarded.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::Decode`] – invalid UTF-8, a control-topic payload
    ///   that is not an envelope, or a topic the bridge does not route.
    /// * Whatever [`ProtocolIngest::incoming`] reports.
    pub fn on_secondary_message(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Envelope, BridgeError> {
        let envelope = self.translate(topic, payload)?;
        let text = envelope.to_json()?;
        trace!(topic, op = %envelope.op, "forwarding to rosbridge");
        self.protocol.incoming(text)?;
        Ok(envelope)
    }

    /// Build the rosbridge operation for an MQTT message without sending it.
    pub fn translate(&self, topic: &str, payload: &[u8]) -> Result<Envelope, BridgeError> {
        let mut envelope = if self.is_control(topic) {
            Self::decode_control(payload)?
        } else if let Some(route) = self.route_for(topic) {
            Envelope::publish(route.ros_topic_for(topic), MessageValue::from_payload(payload)?)
        } else {
            return Err(BridgeError::Decode(format!("no route for MQTT topic {topic}")));
        };

        if self.double_decode
            && let Some(msg) = envelope.msg.as_mut()
            && msg.double_decode_data()
        {
            debug!(topic = %envelope.topic, "decoded JSON-encoded msg.data");
        }
        Ok(envelope)
    }

    fn is_control(&self, topic: &str) -> bool {
        topic == self.control_topic || rumqttc::matches(topic, &self.control_topic)
    }

    fn route_for(&self, topic: &str) -> Option<&InboundRoute> {
        self.routes
            .iter()
            .find(|route| !route.is_wildcard() && route.mqtt_topic == topic)
            .or_else(|| self.routes.iter().find(|route| route.matches(topic)))
    }

    fn decode_control(payload: &[u8]) -> Result<Envelope, BridgeError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| BridgeError::Decode(format!("payload is not valid UTF-8: {e}")))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BridgeError::Decode(format!("invalid JSON on control topic: {e}")))?;
        if !value.get("op").is_some_and(Value::is_string) {
            return Err(BridgeError::Decode(
                "control topic payload has no \"op\" field".to_string(),
            ));
        }
        Envelope::from_value(value)
    }
}
