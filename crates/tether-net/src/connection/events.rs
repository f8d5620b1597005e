//! Names of the events a connection manager emits locally.
//!
//! | Event          | Aliases                       | Arguments                   |
//! |----------------|-------------------------------|-----------------------------|
//! | `connecting`   |                               | none                        |
//! | `open`         | `connect`, `connected`        | address                     |
//! | `close`        | `disconnect`, `disconnected`  | code, reason, was_clean     |
//! | `error`        |                               | `{kind, message}`           |
//! | `reconnecting` |                               | attempt number              |
//!
//! Aliases are resolved when registering and when dispatching, so a
//! listener fires once per event whichever of its names it was registered
//! under.

use tether_core::{AliasTable, LISTENER_FAULT_EVENT};

/// Emitted right before a transport handle is opened by `connect`.
pub const CONNECTING: &str = "connecting";
/// Emitted when the transport reports the connection open.
pub const OPEN: &str = "open";
/// Alias of [`OPEN`].
pub const CONNECT: &str = "connect";
/// Alias of [`OPEN`].
pub const CONNECTED: &str = "connected";
/// Emitted when the transport reports the connection closed.
pub const CLOSE: &str = "close";
/// Alias of [`CLOSE`].
pub const DISCONNECT: &str = "disconnect";
/// Alias of [`CLOSE`].
pub const DISCONNECTED: &str = "disconnected";
/// Emitted for transport failures and failed automatic reconnects.
pub const ERROR: &str = "error";
/// Emitted before each reconnection attempt.
pub const RECONNECTING: &str = "reconnecting";
/// Remote event sent by `join_room`.
pub const JOIN: &str = "join";

/// The alias table every connection manager's bus is built with.
pub fn lifecycle_aliases() -> AliasTable {
    AliasTable::new()
        .alias(CONNECT, OPEN)
        .alias(CONNECTED, OPEN)
        .alias(DISCONNECT, CLOSE)
        .alias(DISCONNECTED, CLOSE)
}

/// Whether a canonical event name is reserved for local lifecycle events.
///
/// Incoming envelopes naming a reserved event are not dispatched.
pub fn is_reserved(canonical: &str) -> bool {
    matches!(canonical, CONNECTING | OPEN | CLOSE | ERROR | RECONNECTING)
        || canonical == LISTENER_FAULT_EVENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_aliases() {
        let aliases = lifecycle_aliases();
        assert_eq!(aliases.resolve(CONNECT), OPEN);
        assert_eq!(aliases.resolve(CONNECTED), OPEN);
        assert_eq!(aliases.resolve(DISCONNECT), CLOSE);
        assert_eq!(aliases.resolve(DISCONNECTED), CLOSE);
        assert_eq!(aliases.resolve(ERROR), ERROR);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved(OPEN));
        assert!(is_reserved(LISTENER_FAULT_EVENT));
        assert!(!is_reserved("chat"));
        assert!(!is_reserved(JOIN));
    }
}
