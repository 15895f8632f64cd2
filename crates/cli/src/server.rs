//! The relay server.
//!
//! Accepts WebSocket connections, decodes each text frame as a
//! [`sdr_protocol::Request`], dispatches it against the single owned page,
//! and sends back exactly one [`sdr_protocol::Response`] per request on the
//! connection that carried it.
//!
//! Page access is serialized: every navigate and evaluate call, across all
//! connections, goes through one mutex in arrival order. A navigation is
//! therefore mutually exclusive with an in-flight evaluation.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use sdr_protocol::{Request, Response};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::error::{RelayError, Result};

/// The page operations the relay dispatches to.
///
/// [`sdr_runtime::Page`] is the production implementation; tests substitute
/// an in-memory driver.
#[async_trait]
pub trait PageDriver: Send + Sync {
	async fn goto(&self, url: &str) -> sdr_runtime::Result<()>;
	async fn evaluate(&self, code: &str) -> sdr_runtime::Result<Value>;
}

#[async_trait]
impl PageDriver for sdr_runtime::Page {
	async fn goto(&self, url: &str) -> sdr_runtime::Result<()> {
		sdr_runtime::Page::goto(self, url).await
	}

	async fn evaluate(&self, code: &str) -> sdr_runtime::Result<Value> {
		sdr_runtime::Page::evaluate(self, code).await
	}
}

struct RelayState {
	page: Arc<dyn PageDriver>,
	/// Serializes all page operations in arrival order.
	page_lock: Mutex<()>,
}

type SharedState = Arc<RelayState>;

/// Bind the listening socket and serve until the server fails.
///
/// Connections are unlimited and held open until the client closes them;
/// request failures never close a connection.
pub async fn run_relay_server(port: u16, page: Arc<dyn PageDriver>) -> Result<()> {
	let state = Arc::new(RelayState {
		page,
		page_lock: Mutex::new(()),
	});

	let app = Router::new()
		.route(
			"/",
			get(
				|ws: WebSocketUpgrade, State(state): State<SharedState>| async move {
					ws.on_upgrade(|socket| handle_socket(socket, state))
				},
			),
		)
		.with_state(state);

	let addr = SocketAddr::from(([127, 0, 0, 1], port));
	info!(target = "sdr", port, "starting relay server");

	let listener = TcpListener::bind(addr)
		.await
		.map_err(|source| RelayError::Bind { addr, source })?;

	axum::serve(listener, app.into_make_service())
		.await
		.map_err(RelayError::Server)
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
	info!(target = "sdr", "connection opened");

	let (tx, rx) = mpsc::unbounded_channel();
	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(msg) = rx_stream.next().await {
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	// Frames are handled one at a time: the next frame is not read until the
	// previous request's response has been queued, so a connection's requests
	// are answered in submission order.
	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => {
				let Some(response) = handle_message(&state, text.as_str()).await else {
					continue;
				};
				match serde_json::to_string(&response) {
					Ok(payload) => {
						if tx.send(Message::Text(payload.into())).is_err() {
							break;
						}
					}
					Err(err) => {
						warn!(target = "sdr", error = %err, "failed to encode response");
					}
				}
			}
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "sdr", error = %err, "websocket error");
				break;
			}
		}
	}

	send_task.abort();
	info!(target = "sdr", "connection closed");
}

/// Decode one frame and dispatch it. Malformed payloads are logged and
/// produce no response; the connection stays open.
async fn handle_message(state: &SharedState, raw: &str) -> Option<Response> {
	let request: Request = match serde_json::from_str(raw) {
		Ok(request) => request,
		Err(err) => {
			warn!(target = "sdr", error = %err, "ignoring malformed request");
			return None;
		}
	};

	Some(dispatch_request(state, request).await)
}

/// Run one request against the page and build its response.
///
/// Navigation and evaluation failures are logged and reported back as a
/// tagged error outcome; they never tear anything down.
async fn dispatch_request(state: &SharedState, request: Request) -> Response {
	let _guard = state.page_lock.lock().await;

	if request.is_goto() {
		match state.page.goto(&request.code).await {
			Ok(()) => Response::ok(request.id, json!(true)),
			Err(err) => {
				warn!(target = "sdr", error = %err, url = %request.code, "navigation failed");
				Response::err(request.id, err.to_string())
			}
		}
	} else {
		match state.page.evaluate(&request.code).await {
			Ok(value) => Response::ok(request.id, value),
			Err(err) => {
				warn!(target = "sdr", error = %err, "evaluation failed");
				Response::err(request.id, err.to_string())
			}
		}
	}
}
