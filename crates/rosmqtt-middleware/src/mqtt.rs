//! MQTT side of the bridge, on top of `rumqttc`.
//!
//! [`MqttLink::connect`] blocks until the broker acknowledges the connection
//! so that a wrong host or refused credentials fail startup instead of
//! surfacing later as silent poll errors.  After that the event loop is
//! driven by [`run_event_loop`], which hands every incoming publish to the
//! [`Bridge`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rosmqtt_types::BridgeError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tracing::{info, warn};

use crate::adapter::{MqttPublisher, MqttTransport};
use crate::bridge::Bridge;

/// Requests buffered between the client handle and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Back-off after a failed poll before the client reconnects.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// QoS level (0, 1 or 2) used for both subscriptions and publishes.
    pub qos: u8,
    /// Largest packet accepted or sent, in bytes.
    pub max_packet_size: Option<usize>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "rosbridge_mqtt".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            qos: 0,
            max_packet_size: None,
        }
    }
}

/// Map a numeric QoS level onto `rumqttc`'s enum.
pub fn qos_from_level(level: u8) -> Result<QoS, BridgeError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::Config(format!("invalid MQTT QoS level {other}"))),
    }
}

/// Connected MQTT client.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
    qos: QoS,
}

impl MqttLink {
    /// Connect to the broker and wait for its `CONNACK`.
    ///
    /// Returns the client together with the event loop, which the caller must
    /// keep polling (see [`run_event_loop`]).
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for an invalid QoS level and
    /// [`BridgeError::Bootstrap`] when the broker is unreachable, refuses the
    /// connection or does not answer within `connect_timeout`.
    pub async fn connect(settings: &MqttSettings) -> Result<(Self, EventLoop), BridgeError> {
        let qos = qos_from_level(settings.qos)?;

        let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        opts.set_keep_alive(settings.keep_alive);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            opts.set_credentials(user, pass);
        }
        if let Some(max) = settings.max_packet_size {
            opts.set_max_packet_size(max, max);
        }

        let (client, mut event_loop) = AsyncClient::new(opts, REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(settings.connect_timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| {
                BridgeError::Bootstrap(format!(
                    "no CONNACK from {}:{} within {:?}",
                    settings.host, settings.port, settings.connect_timeout
                ))
            })??;

        info!(host = %settings.host, port = settings.port, client_id = %settings.client_id, "connected to MQTT broker");
        Ok((Self { client, qos }, event_loop))
    }

    /// Send `DISCONNECT` to the broker.
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BridgeError::Forward(format!("MQTT disconnect: {e}")))
    }
}

impl MqttPublisher for MqttLink {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.client
            .try_publish(topic, self.qos, false, payload)
            .map_err(|e| BridgeError::Forward(format!("MQTT publish on {topic}: {e}")))
    }
}

#[async_trait]
impl MqttTransport for MqttLink {
    async fn subscribe(&self, topic: &str) -> Result<(), BridgeError> {
        self.client
            .subscribe(topic, self.qos)
            .await
            .map_err(|e| BridgeError::Forward(format!("MQTT subscribe to {topic}: {e}")))
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), BridgeError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(BridgeError::Bootstrap(format!("MQTT connect: {e}"))),
        }
    }
}

/// Poll `event_loop`, calling `on_publish` for every incoming publish, until
/// a `DISCONNECT` has been sent.  Poll errors are logged; `rumqttc`
/// reconnects on the next poll.
pub async fn drive_event_loop<F>(mut event_loop: EventLoop, mut on_publish: F)
where
    F: FnMut(&str, &[u8]),
{
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => on_publish(p.topic.as_str(), &p.payload[..]),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT poll error");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Feed every incoming MQTT publish into `bridge`.
pub async fn run_event_loop(event_loop: EventLoop, bridge: Arc<Bridge>) {
    drive_event_loop(event_loop, |topic, payload| {
        bridge.handle_mqtt_message(topic, payload);
    })
    .await
}
