//! Per-message error containment around the two adapters.
//!
//! [`Bridge`] is what the transport event loops call.  The adapters return
//! `Result`s; the bridge turns every error into a log line tagged with the
//! forwarding [`Direction`] and moves on, so one bad message never stops the
//! loop that delivered it.  Delivery is best effort and at most once: a
//! dropped message is counted, not retried.

use std::sync::atomic::{AtomicU64, Ordering};

use rosmqtt_types::Direction;
use tracing::error;

use crate::inbound::InboundAdapter;
use crate::outbound::OutboundAdapter;

/// Snapshot of the forwarding counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub mqtt_to_ros_forwarded: u64,
    pub mqtt_to_ros_dropped: u64,
    pub ros_to_mqtt_forwarded: u64,
    pub ros_to_mqtt_dropped: u64,
}

#[derive(Default)]
struct Counters {
    mqtt_to_ros_forwarded: AtomicU64,
    mqtt_to_ros_dropped: AtomicU64,
    ros_to_mqtt_forwarded: AtomicU64,
    ros_to_mqtt_dropped: AtomicU64,
}

/// Both forwarding directions behind a non-failing interface.
pub struct Bridge {
    inbound: InboundAdapter,
    outbound: OutboundAdapter,
    counters: Counters,
}

impl Bridge {
    pub fn new(inbound: InboundAdapter, outbound: OutboundAdapter) -> Self {
        Self {
            inbound,
            outbound,
            counters: Counters::default(),
        }
    }

    /// Forward an MQTT message to rosbridge.  Returns `true` when forwarded.
    pub fn handle_mqtt_message(&self, topic: &str, payload: &[u8]) -> bool {
        match self.inbound.on_secondary_message(topic, payload) {
            Ok(_) => {
                self.counters.mqtt_to_ros_forwarded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.mqtt_to_ros_dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    direction = %Direction::MqttToRos,
                    topic,
                    error = %e,
                    "Error publishing message to ROS Bridge"
                );
                false
            }
        }
    }

    /// Forward an operation emitted by rosbridge to MQTT.  Returns `true`
    /// when a message was published; non-publish operations return `false`
    /// without counting as dropped.
    pub fn handle_rosbridge_message(&self, text: &str) -> bool {
        match self.outbound.on_outgoing(text) {
            Ok(Some(_)) => {
                self.counters.ros_to_mqtt_forwarded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.counters.ros_to_mqtt_dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    direction = %Direction::RosToMqtt,
                    error = %e,
                    "Error publishing message to MQTT"
                );
                false
            }
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            mqtt_to_ros_forwarded: self.counters.mqtt_to_ros_forwarded.load(Ordering::Relaxed),
            mqtt_to_ros_dropped: self.counters.mqtt_to_ros_dropped.load(Ordering::Relaxed),
            ros_to_mqtt_forwarded: self.counters.ros_to_mqtt_forwarded.load(Ordering::Relaxed),
            ros_to_mqtt_dropped: self.counters.ros_to_mqtt_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapter::{MqttPublisher, ProtocolIngest};
    use crate::bootstrap::InboundRoute;
    use crate::latency::LatencyTracker;
    use crate::testing::{FixedClock, RecordingMqtt, RecordingProtocol};
    use rosmqtt_types::{Envelope, MessageValue};
    use serde_json::json;

    struct Harness {
        mqtt: Arc<RecordingMqtt>,
        protocol: Arc<RecordingProtocol>,
        tracker: Arc<LatencyTracker>,
        bridge: Bridge,
    }

    fn make_bridge() -> Harness {
        let mqtt = Arc::new(RecordingMqtt::default());
        let protocol = Arc::new(RecordingProtocol::default());
        let tracker = Arc::new(LatencyTracker::new());
        let bridge = Bridge::new(
            InboundAdapter::new(
                Arc::clone(&protocol) as Arc<dyn ProtocolIngest>,
                "rosbridge",
                [InboundRoute::new("/chatter")],
                true,
            ),
            OutboundAdapter::new(
                Arc::clone(&mqtt) as Arc<dyn MqttPublisher>,
                Arc::clone(&tracker),
                Arc::new(FixedClock(100.0)),
            ),
        );
        Harness {
            mqtt,
            protocol,
            tracker,
            bridge,
        }
    }

    #[test]
    fn malformed_mqtt_message_is_dropped_and_next_is_forwarded() {
        let h = make_bridge();

        assert!(!h.bridge.handle_mqtt_message("rosbridge", b"{\"op\":"));
        assert!(h.bridge.handle_mqtt_message(
            "rosbridge",
            br#"{"op":"publish","topic":"/chatter","msg":{"data":"hi"}}"#
        ));

        let stats = h.bridge.stats();
        assert_eq!(stats.mqtt_to_ros_dropped, 1);
        assert_eq!(stats.mqtt_to_ros_forwarded, 1);
        assert_eq!(h.protocol.envelopes().len(), 1);
    }

    #[test]
    fn malformed_rosbridge_message_is_dropped_and_next_is_forwarded() {
        let h = make_bridge();

        assert!(!h.bridge.handle_rosbridge_message("{\"op\":\"publish\",\"topic\":"));
        assert!(h.bridge.handle_rosbridge_message(
            r#"{"op":"publish","topic":"/chatter","msg":{"data":"hi"}}"#
        ));

        let stats = h.bridge.stats();
        assert_eq!(stats.ros_to_mqtt_dropped, 1);
        assert_eq!(stats.ros_to_mqtt_forwarded, 1);
        assert_eq!(h.mqtt.published().len(), 1);
    }

    #[test]
    fn mqtt_publish_failure_does_not_poison_the_tracker() {
        let h = make_bridge();
        h.mqtt.fail_on("/down");

        let stamped = |topic: &str| {
            format!(
                r#"{{"op":"publish","topic":"{topic}","msg":{{"header":{{"stamp":{{"secs":99,"nsecs":0}}}}}}}}"#
            )
        };
        assert!(!h.bridge.handle_rosbridge_message(&stamped("/down")));
        assert!(h.bridge.handle_rosbridge_message(&stamped("/up")));

        assert_eq!(h.tracker.snapshot(), vec![1.0, 1.0]);
        assert_eq!(h.bridge.stats().ros_to_mqtt_dropped, 1);
    }

    #[test]
    fn status_operations_are_neither_forwarded_nor_dropped() {
        let h = make_bridge();
        assert!(!h.bridge.handle_rosbridge_message(r#"{"op":"status","level":"info","msg":"ok"}"#));
        assert_eq!(h.bridge.stats(), BridgeStats::default());
    }

    /// A plain string published in ROS, carried over MQTT and delivered back
    /// on a mirrored topic arrives as the same string.
    #[test]
    fn plain_string_survives_a_round_trip() {
        let h = make_bridge();

        let envelope = Envelope::publish("/chatter", MessageValue::from("hello, world"));
        assert!(h.bridge.handle_rosbridge_message(&envelope.to_json().unwrap()));

        let (topic, payload) = h.mqtt.published().remove(0);
        assert!(h.bridge.handle_mqtt_message(&topic, &payload));

        let back = &h.protocol.envelopes()[0];
        assert_eq!(back.topic, "/chatter");
        assert_eq!(back.msg, Some(MessageValue::Plain("hello, world".to_string())));
    }

    /// A JSON-encoded `msg.data` is decoded on the way into ROS and comes
    /// back out as structure, not as a re-stringified blob.
    #[test]
    fn encoded_data_survives_a_round_trip_as_structure() {
        let h = make_bridge();

        let inbound = br#"{"op":"publish","topic":"/chatter","msg":{"data":"{\"people\":[1,2]}"}}"#;
        assert!(h.bridge.handle_mqtt_message("rosbridge", inbound));

        // rosbridge echoes the publish back to its subscribers.
        let echoed = h.protocol.received.lock()[0].clone();
        assert!(h.bridge.handle_rosbridge_message(&echoed));

        let (_, payload) = &h.mqtt.published()[0];
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(value, json!({"data": {"people": [1, 2]}}));
    }
}
