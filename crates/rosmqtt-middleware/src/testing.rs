//! Recording fakes for the collaborator traits.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rosmqtt_types::{BridgeError, Envelope};

use crate::adapter::{MqttPublisher, MqttTransport, ProtocolIngest};
use crate::latency::Clock;

pub(crate) struct FixedClock(pub f64);

impl Clock for FixedClock {
    fn now_epoch(&self) -> f64 {
        self.0
    }
}

/// MQTT fake that records publishes and subscriptions.
///
/// Publishing to a topic listed in `failing_topics` returns
/// [`BridgeError::Forward`].
#[derive(Default)]
pub(crate) struct RecordingMqtt {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub subscribed: Mutex<Vec<String>>,
    pub failing_topics: Mutex<Vec<String>>,
}

impl RecordingMqtt {
    pub fn fail_on(&self, topic: &str) {
        self.failing_topics.lock().push(topic.to_string());
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }
}

impl MqttPublisher for RecordingMqtt {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if self.failing_topics.lock().iter().any(|t| t == topic) {
            return Err(BridgeError::Forward(format!("broker rejected {topic}")));
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

#[async_trait]
impl MqttTransport for RecordingMqtt {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        if self.failing_topics.lock().iter().any(|t| t == topic) {
            return Err(BridgeError::Forward(format!("subscribe to {topic} refused")));
        }
        self.subscribed.lock().push(topic.to_string());
        Ok(())
    }
}

/// rosbridge fake that records every ingested operation.
///
/// The first `fail_first` calls to `incoming` fail.
#[derive(Default)]
pub(crate) struct RecordingProtocol {
    pub received: Mutex<Vec<String>>,
    pub fail_first: AtomicUsize,
}

impl RecordingProtocol {
    pub fn failing(times: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.received
            .lock()
            .iter()
            .map(|text| Envelope::from_json(text).expect("recorded envelope is valid JSON"))
            .collect()
    }
}

impl ProtocolIngest for RecordingProtocol {
    fn incoming(&self, envelope_text: String) -> Result<(), BridgeError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(BridgeError::Forward("rosbridge connection closed".to_string()));
        }
        self.received.lock().push(envelope_text);
        Ok(())
    }
}
