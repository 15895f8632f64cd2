//! Error types for the relay runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the browser.
#[derive(Debug, Error)]
pub enum Error {
    /// No Chromium-family executable could be located.
    #[error(
        "No Chromium-based browser found. Install Chrome or Chromium, or set SDR_BROWSER to an executable path."
    )]
    BrowserNotFound,

    /// The browser process failed to start or never exposed DevTools.
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    /// Failed to establish the DevTools WebSocket connection.
    #[error("Failed to connect to browser DevTools: {0}")]
    ConnectionFailed(String),

    /// Transport-level error (WebSocket framing, socket closed mid-read).
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Protocol-level error (malformed or unexpected CDP payload).
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The browser rejected a CDP command.
    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    /// A script threw inside `Runtime.evaluate`.
    #[error("{0}")]
    Js(String),

    /// Navigation did not complete.
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Channel closed unexpectedly (connection torn down mid-request).
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
