//! `rosmqtt probe` – measure end-to-end latency through a running bridge.
//!
//! `probe send` publishes stamped headers onto the control topic, so the
//! bridge relays them into ROS.  `probe receive` listens on an MQTT topic the
//! bridge mirrors out of ROS and logs how the message age drifts.

use std::sync::Arc;
use std::time::Duration;

use rosmqtt_middleware::mqtt::drive_event_loop;
use rosmqtt_middleware::probe::stamped_envelope;
use rosmqtt_middleware::{
    AgeProbe, Clock, MqttLink, MqttPublisher, MqttTransport, SystemClock,
};
use rosmqtt_types::{BridgeError, Envelope};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Options for `probe send`.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub topic: String,
    pub rate_hz: f64,
    pub frame_id: String,
    pub count: Option<u64>,
}

/// Options for `probe receive`.
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub topic: String,
    /// ROS topic to ask the bridge to mirror onto `topic` first.
    pub subscribe: Option<String>,
    pub msg_type: Option<String>,
}

/// Interval between two stamped messages.
///
/// # Errors
///
/// [`BridgeError::Config`] unless `rate_hz` is a positive finite number.
pub fn send_period(rate_hz: f64) -> Result<Duration, BridgeError> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return Err(BridgeError::Config(format!("rate must be positive, got {rate_hz}")));
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
        .ok_or_else(|| BridgeError::Config(format!("rate {rate_hz} Hz is too high")))
}

pub async fn send(cfg: &Config, opts: &SendOptions) -> Result<(), BridgeError> {
    let period = send_period(opts.rate_hz)?;
    let mut settings = cfg.mqtt_settings();
    settings.client_id = format!("{}_probe_send", settings.client_id);

    let (mqtt, event_loop) = MqttLink::connect(&settings).await?;
    let mut events = tokio::spawn(drive_event_loop(event_loop, |_, _| {}));
    let clock = SystemClock;
    info!(topic = %opts.topic, rate_hz = opts.rate_hz, control_topic = %cfg.control_topic, "sending stamped messages");

    let mut ticker = tokio::time::interval(period);
    let mut seq = 0u64;
    loop {
        if opts.count.is_some_and(|count| seq >= count) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut events => return Err(BridgeError::Forward("MQTT event loop stopped".to_string())),
        }

        let envelope = stamped_envelope(&opts.topic, &opts.frame_id, seq, clock.now_epoch());
        match envelope.to_json() {
            Ok(text) => {
                if let Err(e) = mqtt.publish(&cfg.control_topic, text.into_bytes()) {
                    warn!(seq, error = %e, "probe publish failed");
                }
            }
            Err(e) => warn!(seq, error = %e, "probe message not serialisable"),
        }
        seq += 1;
    }

    info!(sent = seq, "Shutting down");
    finish(&mqtt, events).await;
    Ok(())
}

pub async fn receive(cfg: &Config, opts: &ReceiveOptions) -> Result<(), BridgeError> {
    let mut settings = cfg.mqtt_settings();
    settings.client_id = format!("{}_probe_receive", settings.client_id);

    let (mqtt, event_loop) = MqttLink::connect(&settings).await?;
    mqtt.subscribe(&opts.topic).await?;

    if let Some(ros_topic) = &opts.subscribe {
        let request = Envelope::subscribe(ros_topic.clone(), opts.msg_type.clone()).to_json()?;
        mqtt.publish(&cfg.control_topic, request.into_bytes())?;
        info!(ros = %ros_topic, mqtt = %opts.topic, "requested ROS subscription through the bridge");
    }

    let probe = AgeProbe::new(Arc::new(SystemClock));
    let topic = opts.topic.clone();
    let mut events = tokio::spawn(drive_event_loop(event_loop, move |incoming, payload| {
        if incoming != topic {
            return;
        }
        match probe.observe(payload) {
            Ok(sample) => info!(
                topic = incoming,
                variance = sample.variance,
                "Age of message changed by: {:9.6} seconds",
                sample.age
            ),
            Err(e) => debug!(topic = incoming, error = %e, "message without usable header"),
        }
    }));
    info!(topic = %opts.topic, "waiting for stamped messages");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
        }
        _ = &mut events => return Err(BridgeError::Forward("MQTT event loop stopped".to_string())),
    }

    info!("Shutting down");
    finish(&mqtt, events).await;
    Ok(())
}

async fn finish(mqtt: &MqttLink, mut events: tokio::task::JoinHandle<()>) {
    if let Err(e) = mqtt.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    } else if tokio::time::timeout(Duration::from_secs(1), &mut events).await.is_err() {
        debug!("MQTT disconnect not flushed in time");
    }
    events.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_follows_rate() {
        let fast = send_period(1000.0).unwrap();
        assert!((fast.as_secs_f64() - 0.001).abs() < 1e-9);
        assert_eq!(send_period(0.5).unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn non_positive_rates_are_rejected() {
        for rate in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(send_period(rate), Err(BridgeError::Config(_))), "rate {rate}");
        }
    }

    #[test]
    fn absurd_rates_are_rejected() {
        assert!(matches!(send_period(1e300), Err(BridgeError::Config(_))));
    }
}
