//! Managed connections with lifecycle events and automatic reconnection.
//!
//! [`ConnectionManager`] wraps a [`Transport`](crate::Transport) and keeps one
//! connection alive on behalf of the application. Everything it does is
//! observable as an event on its bus; see [`events`] for the names.

mod config;
pub mod events;
mod manager;
mod state;

pub use config::{ConnectionOptions, TransportOptions};
pub use manager::{CLIENT_CLOSE_REASON, ConnectionManager};
pub use state::ConnectionState;
