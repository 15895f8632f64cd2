//! CDP connection layer
//!
//! Implements request/response correlation on top of the WebSocket transport:
//! - Generating sequential command ids
//! - Correlating replies with pending commands via oneshot channels
//! - Distinguishing events from replies
//! - Fanning events out to subscribers
//!
//! # Message Flow
//!
//! 1. A caller invokes `send_command()` with method, session and params
//! 2. The connection assigns a unique id and registers a oneshot channel
//! 3. The command is serialized and queued for the writer task
//! 4. The caller awaits the oneshot receiver
//! 5. The dispatch loop receives the reply from the transport
//! 6. The reply is correlated by id and resolved through the oneshot channel
//!
//! # Teardown
//!
//! When the transport dies the connection closes for good: every pending
//! command resolves with [`Error::ChannelClosed`], later `send_command` calls
//! fail fast, and the event channel ends so subscribers observe the close.

use crate::error::{Error, Result};
use crate::transport::{TransportParts, WsTransportReceiver, WsTransportSender};
use parking_lot::Mutex as ParkingLotMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{broadcast, mpsc, oneshot};

/// A command sent to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Unique command id for correlating replies.
    pub id: u64,
    /// CDP method name (e.g. `Page.navigate`).
    pub method: String,
    /// Flattened session id for page-scoped commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Method parameters as a JSON object.
    pub params: Value,
}

/// A reply to a previously sent command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    /// Command id this reply correlates to.
    pub id: u64,
    /// Success result (mutually exclusive with `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (mutually exclusive with `result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

/// CDP error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i64,
    pub message: String,
}

/// An unsolicited event from the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event method name (e.g. `Target.targetDestroyed`).
    pub method: String,
    /// Session the event originated from, if page-scoped.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Event parameters as a JSON object.
    #[serde(default)]
    pub params: Value,
}

/// Discriminated union of inbound protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Reply message (has `id` field)
    Reply(CommandReply),
    /// Event message (no `id` field)
    Event(Event),
    /// Unknown message type (forward-compatible catch-all)
    Unknown(Value),
}

/// Pending command callbacks, guarded together with the closed flag so a
/// command can never be registered after the final drain.
struct Pending {
    closed: bool,
    callbacks: HashMap<u64, oneshot::Sender<Result<Value>>>,
}

/// CDP connection to the browser.
///
/// Manages command/reply correlation and event fan-out. Uses sequential
/// command ids and oneshot channels for correlation.
pub struct Connection {
    /// Sequential command id counter.
    last_id: AtomicU64,
    /// Pending command callbacks plus the closed flag.
    pending: Arc<TokioMutex<Pending>>,
    /// Channel for queueing outbound messages to the writer task.
    outbound_tx: mpsc::UnboundedSender<Value>,
    /// Broadcast channel for unsolicited events; `None` once closed so
    /// subscribers observe `RecvError::Closed`.
    events: ParkingLotMutex<Option<broadcast::Sender<Event>>>,
    /// Transport sender (taken by `run()` to start the writer task).
    transport_sender: TokioMutex<Option<WsTransportSender>>,
    /// Transport receiver (taken by `run()` to start the reader task).
    transport_receiver: TokioMutex<Option<WsTransportReceiver>>,
    /// Decoded inbound messages (taken by `run()`).
    message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Outbound queue receiver (taken by `run()`).
    outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
}

impl Connection {
    /// Create a new connection over a freshly connected transport.
    pub fn new(parts: TransportParts) -> Self {
        let TransportParts {
            sender,
            receiver,
            message_rx,
        } = parts;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        Self {
            last_id: AtomicU64::new(0),
            pending: Arc::new(TokioMutex::new(Pending {
                closed: false,
                callbacks: HashMap::new(),
            })),
            outbound_tx,
            events: ParkingLotMutex::new(Some(events)),
            transport_sender: TokioMutex::new(Some(sender)),
            transport_receiver: TokioMutex::new(Some(receiver)),
            message_rx: TokioMutex::new(Some(message_rx)),
            outbound_rx: TokioMutex::new(Some(outbound_rx)),
        }
    }

    /// Test-only connection with no transport attached.
    #[cfg(test)]
    pub fn detached() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        Self {
            last_id: AtomicU64::new(0),
            pending: Arc::new(TokioMutex::new(Pending {
                closed: false,
                callbacks: HashMap::new(),
            })),
            outbound_tx,
            events: ParkingLotMutex::new(Some(events)),
            transport_sender: TokioMutex::new(None),
            transport_receiver: TokioMutex::new(None),
            message_rx: TokioMutex::new(None),
            outbound_rx: TokioMutex::new(Some(outbound_rx)),
        }
    }

    /// Subscribe to unsolicited events.
    ///
    /// On a closed connection the returned receiver reports
    /// `RecvError::Closed` immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        match self.events.lock().as_ref() {
            Some(events) => events.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        }
    }

    /// Send a command and await its reply.
    ///
    /// Fails fast with [`Error::ChannelClosed`] once the connection is gone.
    pub async fn send_command(
        &self,
        method: &str,
        session_id: Option<&str>,
        params: Value,
    ) -> Result<Value> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::debug!(target = "sdr", id, method, "sending command");

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(Error::ChannelClosed);
            }
            pending.callbacks.insert(id, tx);
        }

        let command = Command {
            id,
            method: method.to_string(),
            session_id: session_id.map(str::to_owned),
            params,
        };

        let command_value = serde_json::to_value(&command)?;

        if self.outbound_tx.send(command_value).is_err() {
            self.pending.lock().await.callbacks.remove(&id);
            return Err(Error::ChannelClosed);
        }

        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Run the message dispatch loop until the transport closes.
    ///
    /// On exit the connection is closed: every pending command resolves with
    /// [`Error::ChannelClosed`], later commands are rejected, and event
    /// subscribers observe the close. There is no reconnect.
    pub async fn run(self: Arc<Self>) {
        let receiver = self
            .transport_receiver
            .lock()
            .await
            .take()
            .expect("run() can only be called once - transport receiver already taken");

        let mut sender = self
            .transport_sender
            .lock()
            .await
            .take()
            .expect("run() can only be called once - transport sender already taken");

        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .expect("run() can only be called once - outbound receiver already taken");

        let reader_handle = tokio::spawn(async move {
            if let Err(e) = receiver.run().await {
                tracing::error!(target = "sdr", error = %e, "transport read error");
            }
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sender.send(message).await {
                    tracing::error!(target = "sdr", error = %e, "transport write error");
                    break;
                }
            }
        });

        let mut message_rx = self
            .message_rx
            .lock()
            .await
            .take()
            .expect("run() can only be called once - message receiver already taken");

        while let Some(message_value) = message_rx.recv().await {
            match serde_json::from_value::<Message>(message_value) {
                Ok(message) => self.dispatch_internal(message).await,
                Err(e) => {
                    tracing::error!(target = "sdr", error = %e, "failed to parse message");
                }
            }
        }

        self.close().await;

        // The transport is dead; neither task has anything left to do, and
        // the writer cannot be joined (outbound_tx lives in the Connection).
        reader_handle.abort();
        writer_handle.abort();
    }

    /// Close the connection: reject new commands, resolve every pending
    /// command with [`Error::ChannelClosed`], and end all event
    /// subscriptions.
    pub(crate) async fn close(&self) {
        {
            let mut pending = self.pending.lock().await;
            pending.closed = true;
            for (_, callback) in pending.callbacks.drain() {
                let _ = callback.send(Err(Error::ChannelClosed));
            }
        }

        *self.events.lock() = None;
        tracing::debug!(target = "sdr", "connection closed");
    }

    /// Dispatch an incoming message (test-only public version)
    #[cfg(test)]
    pub async fn dispatch(&self, message: Message) {
        self.dispatch_internal(message).await;
    }

    /// Number of live event subscribers (test-only).
    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.events
            .lock()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    async fn dispatch_internal(&self, message: Message) {
        match message {
            Message::Reply(reply) => {
                let callback = self.pending.lock().await.callbacks.remove(&reply.id);
                let Some(callback) = callback else {
                    tracing::warn!(target = "sdr", id = reply.id, "reply with unknown id");
                    return;
                };

                let result = if let Some(error) = reply.error {
                    Err(Error::Cdp {
                        code: error.code,
                        message: error.message,
                    })
                } else {
                    Ok(reply.result.unwrap_or(Value::Null))
                };

                let _ = callback.send(result);
            }
            Message::Event(event) => {
                tracing::trace!(target = "sdr", method = %event.method, "event");
                // No receivers is fine; events are best-effort fan-out.
                if let Some(events) = self.events.lock().as_ref() {
                    let _ = events.send(event);
                }
            }
            Message::Unknown(value) => {
                tracing::debug!(target = "sdr", %value, "unknown message type (ignored)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn command_serializes_without_absent_session() {
        let command = Command {
            id: 7,
            method: "Target.getTargets".to_string(),
            session_id: None,
            params: json!({}),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value, json!({"id": 7, "method": "Target.getTargets", "params": {}}));
    }

    #[test]
    fn message_deserialization_reply() {
        let json = r#"{"id": 42, "result": {"frameId": "F1"}}"#;
        let message: Message = serde_json::from_str(json).unwrap();

        match message {
            Message::Reply(reply) => {
                assert_eq!(reply.id, 42);
                assert!(reply.result.is_some());
                assert!(reply.error.is_none());
            }
            _ => panic!("Expected Reply"),
        }
    }

    #[test]
    fn message_deserialization_event() {
        let json = r#"{"method": "Target.targetDestroyed", "params": {"targetId": "T1"}}"#;
        let message: Message = serde_json::from_str(json).unwrap();

        match message {
            Message::Event(event) => {
                assert_eq!(event.method, "Target.targetDestroyed");
                assert_eq!(event.params["targetId"], "T1");
                assert!(event.session_id.is_none());
            }
            _ => panic!("Expected Event"),
        }
    }

    #[tokio::test]
    async fn dispatch_reply_success() {
        let connection = Arc::new(Connection::detached());

        let (tx, rx) = oneshot::channel();
        connection.pending.lock().await.callbacks.insert(1, tx);

        connection
            .dispatch(Message::Reply(CommandReply {
                id: 1,
                result: Some(json!({"value": 2})),
                error: None,
            }))
            .await;

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["value"], 2);
    }

    #[tokio::test]
    async fn dispatch_reply_error() {
        let connection = Arc::new(Connection::detached());

        let (tx, rx) = oneshot::channel();
        connection.pending.lock().await.callbacks.insert(3, tx);

        connection
            .dispatch(Message::Reply(CommandReply {
                id: 3,
                result: None,
                error: Some(ErrorPayload {
                    code: -32000,
                    message: "Cannot navigate to invalid URL".to_string(),
                }),
            }))
            .await;

        let err = rx.await.unwrap().unwrap_err();
        match err {
            Error::Cdp { code, message } => {
                assert_eq!(code, -32000);
                assert!(message.contains("invalid URL"));
            }
            other => panic!("Expected Cdp error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let connection = Arc::new(Connection::detached());
        let mut events = connection.subscribe();

        connection
            .dispatch(Message::Event(Event {
                method: "Target.targetDestroyed".to_string(),
                session_id: None,
                params: json!({"targetId": "T9"}),
            }))
            .await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.method, "Target.targetDestroyed");
        assert_eq!(event.params["targetId"], "T9");
    }

    #[tokio::test]
    async fn send_command_after_close_fails_fast() {
        let connection = Arc::new(Connection::detached());
        connection.close().await;

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            connection.send_command("Runtime.evaluate", None, json!({})),
        )
        .await
        .expect("send_command must not hang on a closed connection");

        assert!(matches!(result, Err(Error::ChannelClosed)));
        assert!(connection.pending.lock().await.callbacks.is_empty());
    }

    #[tokio::test]
    async fn pending_commands_resolve_when_connection_closes() {
        let connection = Arc::new(Connection::detached());

        let conn = Arc::clone(&connection);
        let in_flight =
            tokio::spawn(async move { conn.send_command("Page.navigate", None, json!({})).await });

        // Wait for the command to be registered before closing.
        while connection.pending.lock().await.callbacks.is_empty() {
            tokio::task::yield_now().await;
        }

        connection.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), in_flight)
            .await
            .expect("in-flight command must resolve when the connection closes")
            .unwrap();

        assert!(matches!(result, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn subscribers_observe_close() {
        let connection = Arc::new(Connection::detached());

        let mut existing = connection.subscribe();
        connection.close().await;

        assert!(matches!(
            existing.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        // A subscription taken after the close reports Closed immediately.
        let mut late = connection.subscribe();
        assert!(matches!(
            late.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
