//! Error types for the event bus.

/// Errors raised while dispatching events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// A listener panicked while handling an event.
    #[error("listener for '{event}' panicked: {message}")]
    ListenerPanicked {
        /// The canonical name of the event being dispatched.
        event: String,
        /// The panic payload, when it was a string.
        message: String,
    },
}

impl BusError {
    /// Create a listener panic error.
    pub fn listener_panicked(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ListenerPanicked {
            event: event.into(),
            message: message.into(),
        }
    }
}

/// A specialized Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
