//! Startup sequence.
//!
//! Run once, after both transports are connected and before traffic is
//! expected:
//!
//! 1. subscribe to the MQTT control topic;
//! 2. subscribe to every mirrored MQTT topic, advertising the matching ROS
//!    topic when the route declares a message type;
//! 3. ask rosbridge to subscribe to every ROS topic mirrored to MQTT.
//!
//! Any failure is fatal: the caller is expected to exit rather than run a
//! half-configured bridge.

use rosmqtt_types::{BridgeError, Envelope};
use tracing::info;

use crate::adapter::{MqttTransport, ProtocolIngest};

/// MQTT topic mirrored into ROS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRoute {
    pub mqtt_topic: String,
    /// Defaults to `mqtt_topic`.
    pub ros_topic: String,
    /// ROS message type; when set the topic is advertised at startup.
    pub msg_type: Option<String>,
}

impl InboundRoute {
    pub fn new(mqtt_topic: impl Into<String>) -> Self {
        let mqtt_topic = mqtt_topic.into();
        Self {
            ros_topic: mqtt_topic.clone(),
            mqtt_topic,
            msg_type: None,
        }
    }

    pub fn with_ros_topic(mut self, ros_topic: impl Into<String>) -> Self {
        self.ros_topic = ros_topic.into();
        self
    }

    pub fn with_type(mut self, msg_type: impl Into<String>) -> Self {
        self.msg_type = Some(msg_type.into());
        self
    }

    /// `true` when `mqtt_topic` is a filter with `+` or `#` wildcards.
    pub fn is_wildcard(&self) -> bool {
        self.mqtt_topic.contains(['+', '#'])
    }

    /// Whether a message published on `topic` belongs to this route.
    pub fn matches(&self, topic: &str) -> bool {
        if self.is_wildcard() {
            rumqttc::matches(topic, &self.mqtt_topic)
        } else {
            topic == self.mqtt_topic
        }
    }

    /// ROS topic for a message received on `topic`.  A wildcard route
    /// without an explicit ROS topic keeps the concrete MQTT topic.
    pub fn ros_topic_for<'a>(&'a self, topic: &'a str) -> &'a str {
        if self.is_wildcard() && self.ros_topic == self.mqtt_topic {
            topic
        } else {
            &self.ros_topic
        }
    }
}

/// ROS topic mirrored onto MQTT.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundSubscription {
    pub ros_topic: String,
    pub msg_type: Option<String>,
    /// Minimum milliseconds between messages sent by rosbridge.
    pub throttle_rate: Option<u64>,
    /// Messages rosbridge may buffer for this subscription.
    pub queue_length: Option<u64>,
}

impl OutboundSubscription {
    pub fn new(ros_topic: impl Into<String>) -> Self {
        Self {
            ros_topic: ros_topic.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, msg_type: impl Into<String>) -> Self {
        self.msg_type = Some(msg_type.into());
        self
    }

    /// The rosbridge `subscribe` operation for this subscription.
    pub fn to_envelope(&self) -> Envelope {
        let mut envelope = Envelope::subscribe(self.ros_topic.clone(), self.msg_type.clone());
        if let Some(rate) = self.throttle_rate {
            envelope = envelope.with_extra("throttle_rate", rate);
        }
        if let Some(len) = self.queue_length {
            envelope = envelope.with_extra("queue_length", len);
        }
        envelope
    }
}

/// Everything the bridge subscribes to at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapPlan {
    pub control_topic: String,
    pub inbound: Vec<InboundRoute>,
    pub outbound: Vec<OutboundSubscription>,
}

/// Lifecycle of the bridge process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connected,
    Running,
}

/// Issue the startup subscriptions described by `plan`.
///
/// Both transports must already be connected; the returned state is always
/// [`BridgeState::Running`].
///
/// # Errors
///
/// Returns [`BridgeError::Bootstrap`] naming the step that failed.
pub async fn bootstrap(
    mqtt: &dyn MqttTransport,
    protocol: &dyn ProtocolIngest,
    plan: &BootstrapPlan,
) -> Result<BridgeState, BridgeError> {
    mqtt.subscribe(&plan.control_topic).await.map_err(|e| {
        BridgeError::Bootstrap(format!("subscribe to control topic {}: {e}", plan.control_topic))
    })?;
    info!(topic = %plan.control_topic, "subscribed to MQTT control topic");

    for route in &plan.inbound {
        mqtt.subscribe(&route.mqtt_topic).await.map_err(|e| {
            BridgeError::Bootstrap(format!("subscribe to {}: {e}", route.mqtt_topic))
        })?;
        if let Some(msg_type) = &route.msg_type {
            send(protocol, Envelope::advertise(route.ros_topic.clone(), msg_type.clone()))?;
        }
        info!(mqtt = %route.mqtt_topic, ros = %route.ros_topic, "mirroring MQTT topic into ROS");
    }

    for subscription in &plan.outbound {
        send(protocol, subscription.to_envelope())?;
        info!(ros = %subscription.ros_topic, "mirroring ROS topic onto MQTT");
    }

    Ok(BridgeState::Running)
}

fn send(protocol: &dyn ProtocolIngest, envelope: Envelope) -> Result<(), BridgeError> {
    let text = envelope.to_json()?;
    protocol.incoming(text).map_err(|e| {
        BridgeError::Bootstrap(format!("{} {}: {e}", envelope.op, envelope.topic))
    })
}
