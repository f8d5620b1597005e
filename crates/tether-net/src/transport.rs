//! The transport capability the connection manager is built on.
//!
//! A [`Transport`] opens connections; each open connection is represented by
//! a [`TransportHandle`] used to send payloads and request a close. The
//! transport reports what happens to the connection through the
//! [`TransportEvents`] sink it received at open time:
//!
//! - [`opened`](TransportEvents::opened) once the connection is usable
//! - [`message`](TransportEvents::message) for every text payload received
//! - [`error`](TransportEvents::error) for asynchronous failures
//! - [`closed`](TransportEvents::closed) exactly once, when the connection ends
//!
//! Every sink is tagged with the generation key of the handle it belongs
//! to. Once the manager replaces a handle, events reported through the old
//! sink are ignored, so a transport never has to worry about late callbacks.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use slotmap::new_key_type;

use crate::connection::TransportOptions;
use crate::error::{Result, TransportError};
use crate::message::{CloseCode, CloseEvent};

new_key_type! {
    /// Generation key of one transport handle.
    ///
    /// Keys are versioned: a key is never reused for a later handle, even
    /// when the slot it occupied is.
    pub struct HandleId;
}

/// Everything a transport needs to open a connection.
#[derive(Clone, Copy, Debug)]
pub struct OpenRequest<'a> {
    /// The endpoint to connect to.
    pub address: &'a str,
    /// Passthrough options from the connection configuration.
    pub options: &'a TransportOptions,
    /// Upper bound on writing one payload.
    pub send_timeout: Duration,
}

/// Opens connections to a remote peer.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a connection.
    ///
    /// Returns as soon as the attempt is under way. Failures that can be
    /// detected up front (a malformed address, a missing runtime) are
    /// returned; everything else is reported through `events`.
    ///
    /// Events may be reported before `open` returns. Inside a tokio runtime
    /// the resulting retry is always deferred to a task; without one it runs
    /// on the reporting call stack, so a transport that fails synchronously
    /// should be paired with `max_reconnect_attempts` there.
    fn open(
        &self,
        request: OpenRequest<'_>,
        events: TransportEvents,
    ) -> Result<Arc<dyn TransportHandle>>;
}

/// One open (or opening) connection.
pub trait TransportHandle: Send + Sync {
    /// Queue a text payload for sending.
    fn send(&self, payload: String) -> std::result::Result<(), TransportError>;

    /// Request the connection to close.
    ///
    /// Completion is reported through [`TransportEvents::closed`]. Without a
    /// code the peer sees a close frame with no status (1005).
    fn close(&self, code: Option<CloseCode>, reason: Option<String>);
}

/// Something that happened to a connection.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The connection is established.
    Opened,
    /// A text payload was received.
    Message(String),
    /// An asynchronous failure occurred.
    Error(TransportError),
    /// The connection ended.
    Closed(CloseEvent),
}

/// Receiver of transport events, implemented by the connection manager.
pub(crate) trait TransportEventSink: Send + Sync {
    fn handle_transport_event(&self, handle: HandleId, event: TransportEvent);
}

/// Callback sink handed to [`Transport::open`].
///
/// Cheap to clone and safe to use from any thread. Events are dropped
/// silently once the manager that created the sink is gone.
#[derive(Clone)]
pub struct TransportEvents {
    sink: Weak<dyn TransportEventSink>,
    handle: HandleId,
}

impl TransportEvents {
    pub(crate) fn new(sink: Weak<dyn TransportEventSink>, handle: HandleId) -> Self {
        Self { sink, handle }
    }

    /// The generation key of the handle these events belong to.
    pub fn handle_id(&self) -> HandleId {
        self.handle
    }

    /// Report that the connection is established.
    pub fn opened(&self) {
        self.deliver(TransportEvent::Opened);
    }

    /// Report a received text payload.
    pub fn message(&self, payload: impl Into<String>) {
        self.deliver(TransportEvent::Message(payload.into()));
    }

    /// Report an asynchronous failure.
    pub fn error(&self, error: TransportError) {
        self.deliver(TransportEvent::Error(error));
    }

    /// Report that the connection ended.
    pub fn closed(&self, close: CloseEvent) {
        self.deliver(TransportEvent::Closed(close));
    }

    /// Deliver an arbitrary event.
    pub fn deliver(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.upgrade() {
            sink.handle_transport_event(self.handle, event);
        }
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("handle", &self.handle)
            .field("attached", &(self.sink.strong_count() > 0))
            .finish()
    }
}
