//! Latency probe for a running bridge.
//!
//! The sending side publishes header-only messages stamped with the current
//! time onto the MQTT control topic; the bridge relays them into ROS.  The
//! receiving side listens on an MQTT topic the bridge mirrors out of ROS and
//! measures, for every message carrying a header, how old it is on arrival.
//! Together they exercise the full MQTT → ROS → MQTT round trip.

use std::sync::Arc;

use rosmqtt_types::{BridgeError, Envelope, Header, MessageValue, Stamp};
use serde_json::Map;

use crate::latency::{AgeSample, Clock, LatencyTracker};

/// Publish operation whose `msg` is `{"header": {frame_id, seq, stamp}}`
/// stamped `now`.
pub fn stamped_envelope(topic: &str, frame_id: &str, seq: u64, now: f64) -> Envelope {
    let header = Header {
        frame_id: frame_id.to_string(),
        seq,
        stamp: Stamp::from_epoch(now),
    };
    let mut msg = Map::new();
    if let Ok(value) = serde_json::to_value(header) {
        msg.insert("header".to_string(), value);
    }
    Envelope::publish(topic, MessageValue::Structured(msg))
}

/// Receive-side age measurement.
pub struct AgeProbe {
    tracker: LatencyTracker,
    clock: Arc<dyn Clock>,
}

impl AgeProbe {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker: LatencyTracker::new(),
            clock,
        }
    }

    /// Measure the age of one MQTT payload.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Decode`] for payloads that are not JSON objects and
    /// [`BridgeError::Header`] when the header is missing or malformed.
    pub fn observe(&self, payload: &[u8]) -> Result<AgeSample, BridgeError> {
        let msg = match MessageValue::from_payload(payload)? {
            msg @ MessageValue::Structured(_) => msg,
            MessageValue::Plain(_) => {
                return Err(BridgeError::Decode("payload is not a JSON object".to_string()));
            }
        };
        let header = msg
            .header()
            .ok_or_else(|| BridgeError::Header("message has no header".to_string()))??;
        Ok(self.tracker.record_stamp(&header.stamp, self.clock.as_ref()))
    }

    pub fn window(&self) -> Vec<f64> {
        self.tracker.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MqttPublisher;
    use crate::outbound::OutboundAdapter;
    use crate::testing::{FixedClock, RecordingMqtt};
    use rosmqtt_types::OpKind;

    #[test]
    fn stamped_envelope_carries_a_header() {
        let envelope = stamped_envelope("/test_hdr", "test", 4, 1000.5);
        assert_eq!(envelope.op, OpKind::Publish);
        assert_eq!(envelope.topic, "/test_hdr");

        let header = envelope.msg.unwrap().header().unwrap().unwrap();
        assert_eq!(header.frame_id, "test");
        assert_eq!(header.seq, 4);
        assert_eq!(header.stamp, Stamp { secs: 1000, nsecs: 500_000_000 });
    }

    #[test]
    fn probe_measures_age_and_variance() {
        let probe = AgeProbe::new(Arc::new(FixedClock(1001.0)));

        let first = probe
            .observe(br#"{"header":{"stamp":{"secs":1000,"nsecs":0}},"people":[]}"#)
            .unwrap();
        assert!((first.age - 1.0).abs() < 1e-9);
        assert_eq!(first.variance, 0.0);

        let second = probe
            .observe(br#"{"header":{"stamp":{"secs":1000,"nsecs":500000000}}}"#)
            .unwrap();
        assert!((second.age - 0.5).abs() < 1e-9);
        assert!((second.variance - 0.0625).abs() < 1e-9);
        assert_eq!(probe.window().len(), 2);
    }

    #[test]
    fn probe_round_trips_its_own_stamps() {
        let probe = AgeProbe::new(Arc::new(FixedClock(50.25)));
        let envelope = stamped_envelope("/t", "test", 0, 50.0);
        let payload = envelope.msg.unwrap().to_payload().unwrap();

        let sample = probe.observe(&payload).unwrap();
        assert!((sample.age - 0.25).abs() < 1e-6);
    }

    #[test]
    fn stamped_traffic_is_measured_when_forwarded_to_mqtt() {
        let mqtt = Arc::new(RecordingMqtt::default());
        let tracker = Arc::new(LatencyTracker::new());
        let outbound = OutboundAdapter::new(
            Arc::clone(&mqtt) as Arc<dyn MqttPublisher>,
            Arc::clone(&tracker),
            Arc::new(FixedClock(10.5)),
        );

        let envelope = stamped_envelope("/test_hdr", "test", 0, 10.0);
        let report = outbound
            .on_outgoing(&envelope.to_json().unwrap())
            .unwrap()
            .expect("publish is forwarded");

        let age = report.age.expect("stamped message has an age");
        assert!((age.age - 0.5).abs() < 1e-6);
        assert_eq!(tracker.snapshot().len(), 1);

        // The payload that reached MQTT is measurable on the receiving side.
        let receiver = AgeProbe::new(Arc::new(FixedClock(11.0)));
        let (_, payload) = &mqtt.published()[0];
        let sample = receiver.observe(payload).unwrap();
        assert!((sample.age - 1.0).abs() < 1e-6);
    }

    #[test]
    fn probe_rejects_headerless_and_plain_payloads() {
        let probe = AgeProbe::new(Arc::new(FixedClock(0.0)));
        assert!(matches!(probe.observe(b"plain"), Err(BridgeError::Decode(_))));
        assert!(matches!(probe.observe(br#"{"data":1}"#), Err(BridgeError::Header(_))));
        assert!(matches!(
            probe.observe(br#"{"header":{"stamp":{}}}"#),
            Err(BridgeError::Header(_))
        ));
        assert!(probe.window().is_empty());
    }
}
