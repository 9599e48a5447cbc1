//! WebSocket client for a `rosbridge_server`.
//!
//! The ROS side of the bridge is reached through the rosbridge protocol: JSON
//! operations exchanged as WebSocket text frames.  [`RosbridgeClient`]
//! connects and splits the socket in two:
//!
//! * **Writer** – a background task draining an unbounded channel.  The
//!   channel's sending half is the [`RosbridgeHandle`], which implements
//!   [`ProtocolIngest`] so operations can be queued from any thread without
//!   blocking.  `delay_between_messages` is applied between frames.
//!
//! * **Reader** – [`RosbridgeReader::run`] feeds every operation the server
//!   sends (publishes for subscribed topics, status reports, ...) to
//!   [`Bridge::handle_rosbridge_message`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rosmqtt_types::{BridgeError, ProtocolParameters};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, error, info, warn};

use crate::adapter::ProtocolIngest;
use crate::bridge::Bridge;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for a rosbridge server.
#[derive(Debug, Clone)]
pub struct RosbridgeClient {
    url: String,
    parameters: ProtocolParameters,
}

impl RosbridgeClient {
    /// `url` is the server's WebSocket endpoint, e.g. `ws://localhost:9090`.
    pub fn new(url: impl Into<String>, parameters: ProtocolParameters) -> Self {
        Self {
            url: url.into(),
            parameters,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parameters(&self) -> &ProtocolParameters {
        &self.parameters
    }

    /// Open the WebSocket and start the writer task.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Bootstrap`] when the handshake fails.
    pub async fn connect(&self) -> Result<(RosbridgeHandle, RosbridgeReader), BridgeError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = self.parameters.max_message_size;

        let (stream, _) = connect_async_with_config(self.url.as_str(), Some(ws_config), true)
            .await
            .map_err(|e| BridgeError::Bootstrap(format!("rosbridge connect to {}: {e}", self.url)))?;

        info!(
            url = %self.url,
            fragment_timeout = self.parameters.fragment_timeout,
            delay_between_messages = self.parameters.delay_between_messages,
            max_message_size = ?self.parameters.max_message_size,
            unregister_timeout = self.parameters.unregister_timeout,
            "connected to rosbridge"
        );

        let (sink, stream) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let delay = Duration::try_from_secs_f64(self.parameters.delay_between_messages)
            .unwrap_or(Duration::ZERO);
        let writer = tokio::spawn(write_frames(sink, rx, delay));

        Ok((RosbridgeHandle { tx }, RosbridgeReader { stream, writer }))
    }
}

/// Queue for operations bound for the rosbridge server.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct RosbridgeHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl ProtocolIngest for RosbridgeHandle {
    fn incoming(&self, envelope_text: String) -> Result<(), BridgeError> {
        self.tx
            .send(envelope_text)
            .map_err(|_| BridgeError::Forward("rosbridge connection closed".to_string()))
    }
}

/// Receiving half of the rosbridge connection.
pub struct RosbridgeReader {
    stream: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

impl RosbridgeReader {
    /// Feed every operation from the server into `bridge` until the
    /// connection closes.
    pub async fn run(self, bridge: Arc<Bridge>) {
        self.run_with(|text| {
            bridge.handle_rosbridge_message(text);
        })
        .await
    }

    /// Call `on_message` for every text operation until the connection
    /// closes, then stop the writer task.
    pub async fn run_with<F>(mut self, mut on_message: F)
    where
        F: FnMut(&str),
    {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => on_message(text.as_str()),
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => on_message(text),
                    Err(_) => debug!(len = bytes.len(), "ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    info!(?frame, "rosbridge closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "rosbridge read error");
                    break;
                }
            }
        }
        self.writer.abort();
    }
}

async fn write_frames(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
    delay: Duration,
) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!(error = %e, "rosbridge write failed; writer stopping");
            break;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    let _ = sink.close().await;
}
