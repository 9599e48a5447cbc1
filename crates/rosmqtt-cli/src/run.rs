//! `rosmqtt run` – the bridge process.

use std::sync::Arc;
use std::time::Duration;

use rosmqtt_middleware::mqtt::run_event_loop;
use rosmqtt_middleware::{
    Bridge, BridgeState, InboundAdapter, LatencyTracker, MqttLink, MqttPublisher,
    OutboundAdapter, ProtocolIngest, SystemClock, bootstrap,
};
use rosmqtt_types::BridgeError;
use tracing::{error, info, warn};

use crate::config::Config;

/// How long the MQTT event loop gets to flush `DISCONNECT` on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Connect both sides, subscribe, and forward until Ctrl-C or until either
/// connection ends.
///
/// # Errors
///
/// Connection and bootstrap failures, or a transport loop that ended on its
/// own.  Ctrl-C is a clean exit.
pub async fn run(cfg: &Config) -> Result<(), BridgeError> {
    let mut state = BridgeState::Disconnected;
    info!(?state, mqtt = %cfg.mqtt.host, rosbridge = %cfg.rosbridge.url, "starting bridge");

    let (mqtt, event_loop) = MqttLink::connect(&cfg.mqtt_settings()).await?;
    let (rosbridge, reader) = cfg.rosbridge_client().connect().await?;
    state = BridgeState::Connected;
    info!(?state, "both transports connected");

    let mqtt = Arc::new(mqtt);
    let rosbridge = Arc::new(rosbridge);
    let plan = cfg.bootstrap_plan();

    let bridge = Arc::new(Bridge::new(
        InboundAdapter::new(
            Arc::clone(&rosbridge) as Arc<dyn ProtocolIngest>,
            plan.control_topic.clone(),
            plan.inbound.clone(),
            cfg.double_decode,
        ),
        OutboundAdapter::new(
            Arc::clone(&mqtt) as Arc<dyn MqttPublisher>,
            Arc::new(LatencyTracker::new()),
            Arc::new(SystemClock),
        ),
    ));

    let mut mqtt_task = tokio::spawn(run_event_loop(event_loop, Arc::clone(&bridge)));
    let mut ros_task = tokio::spawn(reader.run(Arc::clone(&bridge)));

    state = match bootstrap(mqtt.as_ref(), rosbridge.as_ref(), &plan).await {
        Ok(state) => state,
        Err(e) => {
            mqtt_task.abort();
            ros_task.abort();
            return Err(e);
        }
    };
    info!(?state, control_topic = %plan.control_topic, "bridge running");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            Ok(())
        }
        _ = &mut ros_task => Err(BridgeError::Forward("rosbridge connection closed".to_string())),
        _ = &mut mqtt_task => Err(BridgeError::Forward("MQTT event loop stopped".to_string())),
    };

    info!("Shutting down");
    let stats = bridge.stats();
    info!(
        mqtt_to_ros_forwarded = stats.mqtt_to_ros_forwarded,
        mqtt_to_ros_dropped = stats.mqtt_to_ros_dropped,
        ros_to_mqtt_forwarded = stats.ros_to_mqtt_forwarded,
        ros_to_mqtt_dropped = stats.ros_to_mqtt_dropped,
        "forwarding totals"
    );

    ros_task.abort();
    if !mqtt_task.is_finished() {
        match mqtt.disconnect().await {
            Ok(()) => {
                if tokio::time::timeout(DISCONNECT_GRACE, &mut mqtt_task).await.is_err() {
                    warn!("MQTT disconnect not flushed in time");
                }
            }
            Err(e) => error!(error = %e, "MQTT disconnect failed"),
        }
        mqtt_task.abort();
    }

    outcome
}
