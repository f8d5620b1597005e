//! Error types for the networking module.
//!
//! Two families are kept apart on purpose:
//!
//! - [`ConfigurationError`]: misuse at the call site. Always returned
//!   synchronously from the failing method.
//! - [`TransportError`]: asynchronous trouble reported by the transport.
//!   Never returned from a method; delivered to listeners of the `error`
//!   event instead.

use std::time::Duration;

use serde_json::{Value, json};

/// Misuse of the connection API or invalid options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// No address was configured and none was passed to `connect`.
    #[error(
        "no address to connect to; set one in the connection options or pass it to connect()"
    )]
    MissingAddress,
    /// The operation needs a live transport handle.
    #[error("not connected; call connect() first")]
    NotConnected,
    /// An option has an unusable value.
    #[error("invalid option '{option}': {message}")]
    InvalidOption {
        /// The option name.
        option: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// The address could not be used by the transport.
    #[error("invalid address '{address}': {message}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        message: String,
    },
    /// The transport needs a tokio runtime and none is running.
    #[error("no tokio runtime available to drive the transport")]
    NoRuntime,
    /// A configuration document could not be parsed.
    #[error("failed to parse connection options: {0}")]
    Parse(String),
}

impl ConfigurationError {
    /// Create an invalid option error.
    pub fn invalid_option(option: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            message: message.into(),
        }
    }

    /// Create an invalid address error.
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }
}

/// Asynchronous failures reported by the underlying connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The peer or the socket violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A message could not be written within the send timeout.
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),
    /// The handle no longer accepts commands.
    #[error("transport is closed")]
    Closed,
    /// An incoming payload was not a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(String),
    /// Automatic reconnection stopped at the configured attempt limit.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted {
        /// The number of attempts made.
        attempts: u32,
    },
}

impl TransportError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Protocol(_) => "protocol",
            Self::SendTimeout(_) => "send_timeout",
            Self::Closed => "closed",
            Self::Decode(_) => "decode",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// The payload delivered to `error` listeners.
    pub fn to_payload(&self) -> Value {
        json!({ "kind": self.kind(), "message": self.to_string() })
    }
}

/// Crate-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Misuse of the API.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An outgoing envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport(err) => err.kind(),
            Self::Encode(_) => "encode",
        }
    }

    /// The payload delivered to `error` listeners.
    pub fn to_payload(&self) -> Value {
        json!({ "kind": self.kind(), "message": self.to_string() })
    }

    /// Returns the configuration error, if this is one.
    pub fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            Self::Configuration(err) => Some(err),
            _ => None,
        }
    }
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, Error>;
