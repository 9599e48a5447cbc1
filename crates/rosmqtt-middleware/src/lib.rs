//! `rosmqtt-middleware` – the forwarding engine.
//!
//! Moves messages between a ROS system (through a rosbridge WebSocket) and an
//! MQTT broker, translating envelopes in both directions and tracking how
//! stale the forwarded messages are.
//!
//! # Modules
//!
//! - [`adapter`] – collaborator seams: [`MqttPublisher`], [`MqttTransport`]
//!   and [`ProtocolIngest`].
//! - [`latency`] – [`LatencyTracker`]: bounded window of message ages and
//!   their variance.
//! - [`outbound`] – [`OutboundAdapter`]: rosbridge publish → MQTT publish.
//! - [`inbound`] – [`InboundAdapter`]: MQTT message → rosbridge operation.
//! - [`bridge`] – [`Bridge`]: per-message error containment, logging and
//!   counters around both adapters.
//! - [`bootstrap`] – one-shot subscribe/advertise sequence run at startup.
//! - [`mqtt`] – [`MqttLink`]: `rumqttc` client and its event loop.
//! - [`rosbridge`] – [`RosbridgeClient`]: WebSocket client for a
//!   `rosbridge_server`.
//! - [`probe`] – stamped test traffic and receive-side age measurement.

pub mod adapter;
pub mod bootstrap;
pub mod bridge;
pub mod inbound;
pub mod latency;
pub mod mqtt;
pub mod outbound;
pub mod probe;
pub mod rosbridge;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{MqttPublisher, MqttTransport, ProtocolIngest};
pub use bootstrap::{BootstrapPlan, BridgeState, InboundRoute, OutboundSubscription, bootstrap};
pub use bridge::{Bridge, BridgeStats};
pub use inbound::InboundAdapter;
pub use latency::{AgeSample, AgeWindow, Clock, LatencyTracker, SystemClock};
pub use mqtt::{MqttLink, MqttSettings};
pub use outbound::{OutboundAdapter, OutboundReport};
pub use probe::AgeProbe;
pub use rosbridge::{RosbridgeClient, RosbridgeHandle};
