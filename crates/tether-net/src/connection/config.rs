//! Connection configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigurationError;

/// Options passed through verbatim to the transport on every open.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Custom headers to send during the handshake.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Subprotocols to offer, in order of preference.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Any other transport-specific settings.
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
///
/// Build with the chained setters or deserialize from TOML/JSON; every field
/// except the address has a default.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tether_net::ConnectionOptions;
///
/// let options = ConnectionOptions::new("wss://example.com/socket")
///     .reconnect_interval(Duration::from_secs(2))
///     .max_reconnect_attempts(10)
///     .header("Authorization", "Bearer token");
///
/// assert_eq!(options.max_reconnect_attempts, Some(10));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// The endpoint to connect to. May be supplied later to `connect`.
    #[serde(default)]
    pub address: Option<String>,

    /// Connect as soon as the manager is constructed, if an address is set.
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,

    /// Whether abnormal closes are retried.
    #[serde(default = "default_reconnect_enabled")]
    pub reconnect_enabled: bool,

    /// Fixed delay before each reconnection attempt, in milliseconds.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Reconnection attempts since the last `connect` after which retrying stops.
    /// `None` retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Upper bound on writing one payload, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Passthrough options for the transport.
    #[serde(default)]
    pub transport: TransportOptions,
}

fn default_auto_connect() -> bool {
    true
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            address: None,
            auto_connect: default_auto_connect(),
            reconnect_enabled: default_reconnect_enabled(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: None,
            send_timeout_ms: default_send_timeout_ms(),
            transport: TransportOptions::default(),
        }
    }
}

impl ConnectionOptions {
    /// Options targeting the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Parse options from a TOML document.
    ///
    /// Transport settings live in a `[transport]` table; unknown keys there
    /// are kept in [`TransportOptions::extra`].
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let options: Self =
            toml::from_str(source).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check the options for values no connection can work with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.address.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(ConfigurationError::invalid_option(
                "address",
                "must not be empty; leave it unset to supply it to connect() later",
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_option(
                "send_timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Set the address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set whether to connect on construction.
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Set whether abnormal closes are retried.
    pub fn reconnect_enabled(mut self, enabled: bool) -> Self {
        self.reconnect_enabled = enabled;
        self
    }

    /// Set the delay before each reconnection attempt.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Cap the number of consecutive reconnection attempts.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Retry forever.
    pub fn unlimited_reconnect_attempts(mut self) -> Self {
        self.max_reconnect_attempts = None;
        self
    }

    /// Set the send timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Add a handshake header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.transport.headers.insert(name.into(), value.into());
        self
    }

    /// Offer a subprotocol.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.transport.protocols.push(protocol.into());
        self
    }

    /// Set a transport-specific option.
    pub fn transport_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.transport.extra.insert(key.into(), value.into());
        self
    }

    /// The reconnect delay as a Duration.
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// The send timeout as a Duration.
    pub fn send_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Whether another automatic attempt is allowed after `attempt` ones since `connect`.
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        self.reconnect_enabled && self.max_reconnect_attempts.is_none_or(|max| attempt < max)
    }
}
