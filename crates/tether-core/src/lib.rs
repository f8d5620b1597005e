//! Core systems for Tether.
//!
//! This crate provides the in-process publish/subscribe layer that the
//! connection manager in `tether-net` is built on:
//!
//! - **Event Bus**: Named events dispatched to listeners in registration order
//! - **Listener Handles**: Clonable callbacks compared by identity
//! - **Alias Tables**: Alternate event names resolved to one canonical channel
//! - **Fault Isolation**: A panicking listener never aborts a dispatch
//!
//! # Example
//!
//! ```
//! use tether_core::{AliasTable, EventBus};
//! use serde_json::json;
//!
//! let bus = EventBus::with_aliases(AliasTable::new().alias("connect", "open"));
//!
//! // Registering under an alias subscribes to the canonical channel
//! let listener = bus.on("connect", |args| {
//!     println!("opened: {:?}", args);
//! });
//!
//! bus.dispatch("open", &[json!("wss://example.com")]);
//!
//! // Remove by identity when done
//! bus.unregister("connect", &listener);
//! ```

pub mod bus;
mod error;
pub mod logging;

pub use bus::{AliasTable, EventBus, LISTENER_FAULT_EVENT, Listener};
pub use error::{BusError, Result};

// Listener arguments are dynamically typed JSON values
pub use serde_json::Value;
