//! WebSocket transport for the connection manager.
//!
//! Supports `ws://` and `wss://` (rustls with the platform's native roots),
//! custom handshake headers and subprotocol negotiation.
//!
//! # Example
//!
//! ```ignore
//! use tether_net::{ConnectionManager, ConnectionOptions, WebSocketTransport};
//!
//! let options = ConnectionOptions::new("wss://example.com/socket")
//!     .header("Authorization", "Bearer token")
//!     .protocol("chat.v1");
//!
//! let manager = ConnectionManager::new(WebSocketTransport::new(), options)?;
//! ```

mod transport;

pub use transport::{WebSocketHandle, WebSocketTransport};
