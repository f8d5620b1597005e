//! Networking module for Tether.
//!
//! This crate provides resilient client connections:
//!
//! - **Connection Manager**: Owns one connection, reports its lifecycle as events
//! - **Automatic Reconnection**: Abnormal closes are retried after a fixed delay
//! - **Event Envelopes**: Application events travel as `{event, data}` JSON
//! - **WebSocket Transport**: `ws://` and `wss://` via tokio-tungstenite
//!
//! # Connection Manager
//!
//! ```ignore
//! use tether_net::{ConnectionManager, ConnectionOptions};
//! use serde_json::json;
//!
//! let options = ConnectionOptions::new("wss://example.com/socket")
//!     .auto_connect(false)
//!     .max_reconnect_attempts(5);
//! let manager = ConnectionManager::websocket(options)?;
//!
//! manager.on("connected", |args| println!("open: {}", args[0]));
//! manager.on("reconnecting", |args| println!("attempt {}", args[0]));
//! manager.on("message", |args| println!("server: {:?}", args));
//!
//! manager.connect(None)?;
//!
//! // Once open
//! manager.join_room("lobby", vec![json!({"nick": "ada"})])?;
//! manager.send("message", vec![json!("hello")])?;
//!
//! // Stop for good
//! manager.disconnect()?;
//! ```
//!
//! ## Lifecycle Events
//!
//! | Event          | Also fires for                | Arguments               |
//! |----------------|-------------------------------|-------------------------|
//! | `connecting`   |                               |                         |
//! | `open`         | `connect`, `connected`        | address                 |
//! | `close`        | `disconnect`, `disconnected`  | code, reason, was_clean |
//! | `error`        |                               | `{kind, message}`       |
//! | `reconnecting` |                               | attempt                 |
//!
//! Any other event name is free for application events received from the
//! peer.
//!
//! # Custom Transports
//!
//! The manager only depends on the [`Transport`] trait, so other protocols
//! (or an in-memory transport for tests) plug in the same way as
//! [`WebSocketTransport`].
//!
//! # Configuration
//!
//! [`ConnectionOptions`] can be built in code or loaded from TOML:
//!
//! ```
//! use tether_net::ConnectionOptions;
//!
//! let options = ConnectionOptions::from_toml_str(r#"
//!     address = "ws://localhost:9000"
//!     reconnect_interval_ms = 1000
//!     max_reconnect_attempts = 3
//!
//!     [transport.headers]
//!     Authorization = "Bearer token"
//! "#).unwrap();
//!
//! assert_eq!(options.max_reconnect_attempts, Some(3));
//! ```

pub mod connection;
mod error;
mod message;
mod transport;
pub mod websocket;

pub use connection::{
    CLIENT_CLOSE_REASON, ConnectionManager, ConnectionOptions, ConnectionState, TransportOptions,
    events,
};
pub use error::{ConfigurationError, Error, Result, TransportError};
pub use message::{CloseCode, CloseEvent, Envelope};
pub use transport::{
    HandleId, OpenRequest, Transport, TransportEvent, TransportEvents, TransportHandle,
};
pub use websocket::WebSocketTransport;

pub use tether_core::{AliasTable, EventBus, Listener, Value};
