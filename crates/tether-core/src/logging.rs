//! Logging facilities for Tether.
//!
//! Tether uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("tether_net=debug,tether_core=info")
//!         .init();
//! }
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "tether_core";
    /// Event bus dispatch target.
    pub const BUS: &str = "tether_core::bus";
    /// Networking crate target.
    pub const NET: &str = "tether_net";
    /// Connection lifecycle target.
    pub const CONNECTION: &str = "tether_net::connection";
    /// WebSocket transport target.
    pub const WEBSOCKET: &str = "tether_net::websocket";
}

/// Extract a printable message from a panic payload.
///
/// Panics raised with `panic!("literal")` carry a `&'static str`, formatted
/// panics carry a `String`; anything else is reported generically.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
