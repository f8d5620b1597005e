//! Wire-level types: close codes, close events and the event envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Close status codes as defined in RFC 6455.
///
/// Only [`CloseCode::Normal`] (1000) has a special meaning to the connection
/// manager: it marks a session that ended on purpose and is not retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum CloseCode {
    /// 1000: the session completed.
    #[default]
    Normal,
    /// 1001: endpoint is going away.
    Away,
    /// 1002: protocol error.
    Protocol,
    /// 1003: unacceptable data type.
    Unsupported,
    /// 1005: no status code was present in the close frame.
    NoStatus,
    /// 1006: the connection dropped without a close frame.
    Abnormal,
    /// 1007: payload inconsistent with the message type.
    Invalid,
    /// 1008: policy violation.
    Policy,
    /// 1009: message too big.
    TooBig,
    /// 1010: extension negotiation failed.
    Extension,
    /// 1011: unexpected server condition.
    Error,
    /// 1012: server restarting.
    Restart,
    /// 1013: try again later.
    Again,
    /// Any other code, including application codes 4000-4999.
    Other(u16),
}

impl CloseCode {
    /// The numeric close code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::Unsupported => 1003,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::Invalid => 1007,
            Self::Policy => 1008,
            Self::TooBig => 1009,
            Self::Extension => 1010,
            Self::Error => 1011,
            Self::Restart => 1012,
            Self::Again => 1013,
            Self::Other(code) => code,
        }
    }

    /// Map a numeric close code.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::TooBig,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            code => Self::Other(code),
        }
    }

    /// Returns `true` for the normal-closure code (1000).
    pub fn is_normal(self) -> bool {
        matches!(self, Self::Normal)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self::from_u16(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A transport-level close notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseEvent {
    /// The close status code.
    pub code: CloseCode,
    /// The human-readable reason, empty if none was given.
    pub reason: String,
    /// Whether the closing handshake completed.
    pub was_clean: bool,
}

impl CloseEvent {
    /// Create a close event.
    pub fn new(code: impl Into<CloseCode>, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
            was_clean,
        }
    }

    /// A connection that dropped without a closing handshake (1006).
    pub fn abnormal() -> Self {
        Self::new(CloseCode::Abnormal, "", false)
    }

    /// The arguments passed to `close` listeners: `[code, reason, was_clean]`.
    pub fn to_args(&self) -> [Value; 3] {
        [
            Value::from(self.code.as_u16()),
            Value::String(self.reason.clone()),
            Value::Bool(self.was_clean),
        ]
    }
}

/// The `{event, data}` wrapper carrying application-level events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The event name.
    pub event: String,
    /// The event arguments.
    #[serde(default)]
    pub data: Vec<Value>,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(event: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Serialize to JSON text.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse JSON text received from the peer.
    pub fn decode(text: &str) -> std::result::Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_close_code_conversion() {
        assert_eq!(CloseCode::Normal.as_u16(), 1000);
        assert_eq!(CloseCode::Abnormal.as_u16(), 1006);
        assert_eq!(CloseCode::from_u16(1001), CloseCode::Away);
        assert_eq!(CloseCode::from_u16(4001), CloseCode::Other(4001));
        assert_eq!(CloseCode::from(1000_u16), CloseCode::Normal);
        assert!(CloseCode::Normal.is_normal());
        assert!(!CloseCode::Other(4000).is_normal());
    }

    #[test]
    fn test_close_event_args() {
        let close = CloseEvent::new(CloseCode::Normal, "Closed by client", true);
        assert_eq!(
            close.to_args(),
            [json!(1000), json!("Closed by client"), json!(true)]
        );
        assert_eq!(CloseEvent::abnormal().code, CloseCode::Abnormal);
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = Envelope::new("chat", vec![json!("hi"), json!({"to": "all"})]);
        let text = envelope.encode().unwrap();
        assert_eq!(text, r#"{"event":"chat","data":["hi",{"to":"all"}]}"#);
    }

    #[test]
    fn test_envelope_decode() {
        let envelope = Envelope::decode(r#"{"event":"tick"}"#).unwrap();
        assert_eq!(envelope.event, "tick");
        assert!(envelope.data.is_empty());

        let err = Envelope::decode("not json").unwrap_err();
        assert_eq!(err.kind(), "decode");
    }
}
