//! Relay runtime - browser lifecycle, CDP connection, and page handle
//!
//! This crate provides the infrastructure the relay server uses to own a
//! single browser page:
//!
//! - **Browser management**: Locating and launching a Chromium executable
//!   with a persistent profile and an app-styled window
//! - **Transport**: Text-frame WebSocket communication with DevTools
//! - **Connection**: CDP command/reply correlation and event fan-out
//! - **Page**: navigate, evaluate, and a close notification
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   sdr-cli   │  Relay server (axum WebSocket)
//! └──────┬──────┘
//!        │ goto / evaluate / closed
//! ┌──────▼──────┐
//! │ sdr-runtime │  This crate
//! │  ┌────────┐ │
//! │  │ Page   │ │  Session + page handle
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Conn   │ │  CDP correlation
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Trans  │ │  WebSocket transport
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │Browser │ │  Process management
//! │  └────────┘ │
//! └─────────────┘
//! ```

pub mod browser;
pub mod connection;
pub mod error;
pub mod page;
pub mod transport;

// Re-export key types at crate root
pub use browser::{BrowserProcess, LaunchConfig, locate_browser};
pub use connection::{Command, CommandReply, Connection, Event, Message};
pub use error::{Error, Result};
pub use page::{Page, Session};
