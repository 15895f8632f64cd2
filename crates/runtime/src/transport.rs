//! WebSocket transport for the DevTools protocol
//!
//! Frames JSON values as text WebSocket messages. The transport is split into
//! a sender half and a receiver half so the connection layer can run reads
//! and writes on independent tasks; decoded inbound messages are forwarded on
//! an unbounded channel.

use crate::error::{Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The pieces handed to the connection layer after a successful connect.
pub struct TransportParts {
    pub sender: WsTransportSender,
    pub receiver: WsTransportReceiver,
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Writer half: serializes values into text frames.
pub struct WsTransportSender {
    sink: SplitSink<WsStream, WsMessage>,
}

/// Reader half: decodes text frames and forwards them on the message channel.
pub struct WsTransportReceiver {
    stream: SplitStream<WsStream>,
    message_tx: mpsc::UnboundedSender<Value>,
}

/// Connect to a DevTools WebSocket endpoint and split the transport.
pub async fn connect(url: &str) -> Result<TransportParts> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;

    let (sink, stream) = ws.split();
    let (message_tx, message_rx) = mpsc::unbounded_channel();

    Ok(TransportParts {
        sender: WsTransportSender { sink },
        receiver: WsTransportReceiver { stream, message_tx },
        message_rx,
    })
}

impl WsTransportSender {
    /// Serialize and send one message.
    pub async fn send(&mut self, message: Value) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        self.sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::TransportError(format!("WebSocket send failed: {e}")))
    }
}

impl WsTransportReceiver {
    /// Run the read loop until the socket closes or errors.
    ///
    /// Non-text frames are ignored; undecodable text frames are logged and
    /// skipped rather than tearing the transport down.
    pub async fn run(mut self) -> Result<()> {
        while let Some(frame) = self.stream.next().await {
            let frame = frame.map_err(|e| Error::TransportError(format!("WebSocket read failed: {e}")))?;
            match frame {
                WsMessage::Text(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => {
                        if self.message_tx.send(value).is_err() {
                            // Connection layer dropped its receiver; stop reading.
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(target = "sdr", error = %e, "dropping undecodable frame");
                    }
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }
}
