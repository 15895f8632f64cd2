//! Wire types for the sd-webui relay protocol.
//!
//! This crate contains the serde-serializable types exchanged between the
//! relay server and its clients over text WebSocket frames. These types
//! represent the "protocol layer" - the shapes of data as they appear on
//! the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The dispatch logic that gives these types meaning lives in `sdr-cli`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved correlation id that turns a request into a navigation.
///
/// A request whose `id` equals this sentinel treats `code` as a URL to load
/// instead of a script to evaluate.
pub const GOTO_ID: &str = "goto";

/// Discriminator carried by every relay response.
pub const RESPONSE_KIND: &str = "sd-webui";

/// A single inbound relay request.
///
/// `id` is an opaque correlation token chosen by the caller; the relay echoes
/// it back verbatim in the matching [`Response`]. `code` is either a URL
/// (when `id` is [`GOTO_ID`]) or a script body to evaluate in the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub code: String,
}

impl Request {
    /// Whether this request asks for navigation rather than evaluation.
    pub fn is_goto(&self) -> bool {
        self.id == GOTO_ID
    }
}

/// A single outbound relay response.
///
/// Exactly one response is sent per decoded request, on the connection that
/// carried the request, after the page operation settles.
///
/// Success and failure are distinguishable: on success `result` holds the
/// outcome (`true` for navigation, the JSON-coerced script value for
/// evaluation) and `error` is absent; on failure `result` is `null` and
/// `error` holds the failure message. A script that legitimately returns
/// `null` therefore never looks like a thrown error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always the literal `"sd-webui"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Build a success response carrying `result`.
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            kind: RESPONSE_KIND.to_string(),
            id: id.into(),
            result,
            error: None,
        }
    }

    /// Build a failure response carrying the error message.
    pub fn err(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_KIND.to_string(),
            id: id.into(),
            result: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Whether this response reports success.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
