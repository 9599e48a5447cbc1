//! ROS → MQTT forwarding.
//!
//! [`OutboundAdapter`] receives publish operations emitted by the rosbridge
//! server for the topics the bridge subscribed to, strips the envelope and
//! republishes the bare message on the MQTT topic of the same name:
//!
//! * plain string messages are sent as their UTF-8 bytes;
//! * structured messages are sent as the JSON encoding of the whole `msg`;
//! * messages carrying a `header.stamp` additionally feed the shared
//!   [`LatencyTracker`].

use std::sync::Arc;

use rosmqtt_types::{BridgeError, Envelope, MessageValue, OpKind};
use tracing::{debug, info, warn};

use crate::adapter::MqttPublisher;
use crate::latency::{AgeSample, Clock, LatencyTracker};

/// Outcome of a successfully forwarded message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundReport {
    pub topic: String,
    pub bytes: usize,
    /// Present when the message carried a well-formed header.
    pub age: Option<AgeSample>,
}

/// Adapter from rosbridge publish operations to MQTT publishes.
pub struct OutboundAdapter {
    publisher: Arc<dyn MqttPublisher>,
    tracker: Arc<LatencyTracker>,
    clock: Arc<dyn Clock>,
}

impl OutboundAdapter {
    pub fn new(
        publisher: Arc<dyn MqttPublisher>,
        tracker: Arc<LatencyTracker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            publisher,
            tracker,
            clock,
        }
    }

    /// Handle a raw operation emitted by the rosbridge server.
    ///
    /// Returns `Ok(None)` for operations other than `publish` (status
    /// reports, service responses, ...), which have no MQTT counterpart.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Decode`] when the text is not an envelope or a publish
    /// lacks its topic or message; otherwise whatever
    /// [`on_primary_publish`][Self::on_primary_publish] returns.
    pub fn on_outgoing(&self, text: &str) -> Result<Option<OutboundReport>, BridgeError> {
        let envelope = Envelope::from_json(text)?;
        if envelope.op != OpKind::Publish {
            debug!(op = %envelope.op, topic = %envelope.topic, "ignoring non-publish operation");
            return Ok(None);
        }
        if envelope.topic.is_empty() {
            return Err(BridgeError::Decode("publish operation without topic".to_string()));
        }
        let msg = envelope.msg.ok_or_else(|| {
            BridgeError::Decode(format!("publish on {} without msg", envelope.topic))
        })?;
        self.on_primary_publish(&envelope.topic, &msg).map(Some)
    }

    /// Forward one ROS message to MQTT.
    ///
    /// A malformed header is logged and skipped; it never prevents the
    /// message itself from being forwarded.
    pub fn on_primary_publish(
        &self,
        topic: &str,
        msg: &MessageValue,
    ) -> Result<OutboundReport, BridgeError> {
        let age = match msg.header() {
            Some(Ok(header)) => {
                let sample = self.tracker.record_stamp(&header.stamp, self.clock.as_ref());
                info!(
                    topic,
                    age_secs = sample.age,
                    "Age Variance: {:6.3}",
                    sample.variance
                );
                Some(sample)
            }
            Some(Err(e)) => {
                warn!(topic, error = %e, "skipping age measurement");
                None
            }
            None => None,
        };

        let payload = msg.to_payload()?;
        let bytes = payload.len();
        self.publisher.publish(topic, payload)?;

        Ok(OutboundReport {
            topic: topic.to_string(),
            bytes,
            age,
        })
    }
}
