//! The resilient connection manager.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tether_core::logging::targets;
use tether_core::{EventBus, Listener};

use super::config::ConnectionOptions;
use super::events;
use super::state::{ConnectionState, ManagerState, ReconnectPlan, RetiredHandle};
use crate::error::{ConfigurationError, Error, Result, TransportError};
use crate::message::{CloseCode, CloseEvent, Envelope};
use crate::transport::{
    HandleId, OpenRequest, Transport, TransportEvent, TransportEventSink, TransportEvents,
};
use crate::websocket::WebSocketTransport;

/// Close reason sent by [`ConnectionManager::disconnect`].
pub const CLIENT_CLOSE_REASON: &str = "Closed by client";

/// Close reason sent to a handle replaced by a newer one.
const SUPERSEDED_REASON: &str = "Superseded by a new connection";

/// A connection that keeps itself alive and reports its lifecycle as events.
///
/// The manager owns one transport handle at a time. Transport callbacks are
/// turned into named events on an [`EventBus`] (see [`events`](super::events)
/// for the names), and abnormal closes are retried according to the
/// [`ConnectionOptions`].
///
/// `ConnectionManager` is a cheap handle: clones share the same connection.
/// Listeners may call back into the manager; no internal lock is held while
/// they run.
///
/// # Lifecycle
///
/// ```text
/// Idle --connect--> Connecting --opened--> Open --disconnect--> Closing
///                       ^                   |                      |
///                       |                closed                 closed
///                       |                   v                      v
///                       +---- reconnect -- Closed <----------------+
/// ```
///
/// A close with code 1000 ends the session. Any other close is retried
/// after `reconnect_interval` unless the client asked to disconnect,
/// reconnection is disabled, or `max_reconnect_attempts` attempts were
/// already made since the last `connect`.
///
/// # Example
///
/// ```ignore
/// use tether_net::{ConnectionManager, ConnectionOptions};
/// use serde_json::json;
///
/// let manager = ConnectionManager::websocket(ConnectionOptions::new("wss://example.com/socket"))?;
///
/// manager.on("connect", |args| println!("connected to {}", args[0]));
/// manager.on("disconnect", |args| println!("closed with code {}", args[0]));
/// manager.on("chat", |args| println!("server says {:?}", args));
///
/// // Later, once open
/// manager.send("chat", vec![json!("hello")])?;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    this: Weak<ManagerInner>,
    transport: Box<dyn Transport>,
    options: ConnectionOptions,
    bus: EventBus,
    state: Mutex<ManagerState>,
}

/// What to do after a close has been reported to listeners.
enum AfterClose {
    Stay,
    Retry,
    GiveUp { attempts: u32 },
}

impl ConnectionManager {
    /// Create a manager on top of `transport`.
    ///
    /// Connects immediately when `auto_connect` is set. Fails if
    /// `auto_connect` is set without an address to connect to.
    pub fn new<T: Transport>(transport: T, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;
        if options.auto_connect && options.address.is_none() {
            return Err(ConfigurationError::invalid_option(
                "auto_connect",
                "requires an address; set one or disable auto_connect",
            )
            .into());
        }
        let auto_connect = options.auto_connect;

        let inner = Arc::new_cyclic(|this| ManagerInner {
            this: this.clone(),
            transport: Box::new(transport),
            state: Mutex::new(ManagerState::new(options.address.clone())),
            bus: EventBus::with_aliases(events::lifecycle_aliases()),
            options,
        });
        let manager = Self { inner };

        if auto_connect {
            manager.connect(None)?;
        }
        Ok(manager)
    }

    /// Create a manager using the WebSocket transport.
    pub fn websocket(options: ConnectionOptions) -> Result<Self> {
        Self::new(WebSocketTransport::new(), options)
    }

    /// Open the connection.
    ///
    /// `address` replaces the configured address when given. Resets the
    /// attempt counter and both closed-by flags, cancels a pending
    /// reconnect, emits `connecting` and opens a new transport handle,
    /// replacing any existing one.
    pub fn connect(&self, address: Option<&str>) -> Result<()> {
        self.inner.connect(address)
    }

    /// Alias for `connect(None)`.
    pub fn open(&self) -> Result<()> {
        self.connect(None)
    }

    /// Close the connection on purpose.
    ///
    /// Asks the transport to close with code 1000 and suppresses automatic
    /// reconnection. The `close` event is emitted once the transport
    /// reports the close.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.disconnect()
    }

    /// Alias for [`disconnect`](Self::disconnect).
    pub fn close(&self) -> Result<()> {
        self.disconnect()
    }

    /// Replace the current handle with a fresh one right away.
    ///
    /// Requires an existing handle. Increments the attempt counter and emits
    /// `reconnecting` with its new value.
    pub fn reconnect(&self, address: Option<&str>) -> Result<()> {
        self.inner.reconnect(address)
    }

    /// Send an event to the remote peer.
    ///
    /// The event and its arguments travel as an [`Envelope`]. Fails with
    /// [`ConfigurationError::NotConnected`] unless the connection is open.
    pub fn send(&self, event: &str, data: Vec<Value>) -> Result<()> {
        self.inner.send(event, data)
    }

    /// Send the reserved `join` event for a room.
    ///
    /// The payload is one object holding `room` plus each extra argument
    /// under its index (`"0"`, `"1"`, ...).
    pub fn join_room(&self, room: &str, args: Vec<Value>) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("room".to_owned(), Value::String(room.to_owned()));
        for (index, arg) in args.into_iter().enumerate() {
            payload.insert(index.to_string(), arg);
        }
        self.send(events::JOIN, vec![Value::Object(payload)])
    }

    /// Register a closure for a local event and return its handle.
    pub fn on<F>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.bus.on(event, callback)
    }

    /// Register a listener handle for a local event.
    pub fn register(&self, event: &str, listener: Listener) -> &Self {
        self.inner.bus.register(event, listener);
        self
    }

    /// Remove a listener from a local event.
    pub fn off(&self, event: &str, listener: &Listener) -> &Self {
        self.inner.bus.unregister(event, listener);
        self
    }

    /// The local event bus.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Returns true if the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// The address the next open will target.
    pub fn address(&self) -> Option<String> {
        self.inner.state.lock().address.clone()
    }

    /// Reconnection attempts since the last `connect`.
    pub fn attempt(&self) -> u32 {
        self.inner.state.lock().attempt
    }

    /// Whether the last close was requested by [`disconnect`](Self::disconnect).
    pub fn closed_by_client(&self) -> bool {
        self.inner.state.lock().closed_by_client
    }

    /// Whether the peer ended the session with a normal close.
    pub fn closed_by_server(&self) -> bool {
        self.inner.state.lock().closed_by_server
    }

    /// Whether an automatic reconnection is waiting for its delay.
    pub fn reconnect_pending(&self) -> bool {
        self.inner.state.lock().has_pending_reconnect()
    }

    /// The options this manager was created with.
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionManager")
            .field("address", &state.address)
            .field("state", &state.state)
            .field("attempt", &state.attempt)
            .finish()
    }
}

impl ManagerInner {
    fn connect(&self, address: Option<&str>) -> Result<()> {
        let (address, retired) = {
            let mut state = self.state.lock();
            let address = match address.filter(|a| !a.is_empty()) {
                Some(address) => address.to_owned(),
                None => state
                    .address
                    .clone()
                    .ok_or(ConfigurationError::MissingAddress)?,
            };
            state.address = Some(address.clone());
            state.attempt = 0;
            state.closed_by_client = false;
            state.closed_by_server = false;
            state.cancel_pending_reconnect();
            (address, state.retire_current())
        };

        tracing::info!(target: targets::CONNECTION, %address, "connecting");
        close_retired(retired, Some(CloseCode::Normal), Some(SUPERSEDED_REASON));
        self.bus.dispatch(events::CONNECTING, &[]);
        self.open_transport(address)
    }

    fn disconnect(&self) -> Result<()> {
        let handle = {
            let mut state = self.state.lock();
            let handle = state
                .current_handle()
                .ok_or(ConfigurationError::NotConnected)?;
            state.closed_by_client = true;
            state.cancel_pending_reconnect();
            if state.state != ConnectionState::Closed {
                state.state = ConnectionState::Closing;
            }
            handle
        };

        tracing::info!(target: targets::CONNECTION, "disconnecting");
        handle.close(Some(CloseCode::Normal), Some(CLIENT_CLOSE_REASON.to_owned()));
        Ok(())
    }

    fn reconnect(&self, address: Option<&str>) -> Result<()> {
        let plan = {
            let mut state = self.state.lock();
            if !state.has_handle() {
                return Err(ConfigurationError::NotConnected.into());
            }
            state
                .begin_reconnect(address)
                .ok_or(ConfigurationError::MissingAddress)?
        };
        self.run_reconnect(plan)
    }

    fn run_reconnect(&self, plan: ReconnectPlan) -> Result<()> {
        let ReconnectPlan {
            retired,
            attempt,
            address,
        } = plan;

        tracing::info!(target: targets::CONNECTION, %address, attempt, "reconnecting");
        close_retired(retired, None, None);
        self.bus.dispatch(events::RECONNECTING, &[Value::from(attempt)]);
        self.open_transport(address)
    }

    fn send(&self, event: &str, data: Vec<Value>) -> Result<()> {
        let handle = {
            let state = self.state.lock();
            if !state.state.is_open() {
                return Err(ConfigurationError::NotConnected.into());
            }
            state
                .current_handle()
                .ok_or(ConfigurationError::NotConnected)?
        };

        let payload = Envelope::new(event, data).encode()?;
        if let Err(err) = handle.send(payload) {
            tracing::warn!(target: targets::CONNECTION, error = %err, event, "send failed");
            self.bus.dispatch(events::ERROR, &[err.to_payload()]);
        }
        Ok(())
    }

    fn open_transport(&self, address: String) -> Result<()> {
        let (id, retired) = self.state.lock().reserve_handle();
        close_retired(retired, Some(CloseCode::Normal), Some(SUPERSEDED_REASON));

        let sink: Weak<dyn TransportEventSink> = self.this.clone();
        let request = OpenRequest {
            address: &address,
            options: &self.options.transport,
            send_timeout: self.options.send_timeout_duration(),
        };

        match self.transport.open(request, TransportEvents::new(sink, id)) {
            Ok(handle) => {
                let stale = self.state.lock().install_handle(id, handle);
                close_retired(stale, Some(CloseCode::Normal), Some(SUPERSEDED_REASON));
                Ok(())
            }
            Err(err) => {
                tracing::warn!(target: targets::CONNECTION, %address, error = %err, "open failed");
                self.state.lock().abandon_handle(id);
                Err(err)
            }
        }
    }

    fn handle_opened(&self, id: HandleId) {
        let address = {
            let mut state = self.state.lock();
            if !state.is_current(id) {
                return;
            }
            // A disconnect requested while opening wins over the late open
            if state.closed_by_client {
                tracing::debug!(target: targets::CONNECTION, "opened after disconnect was requested");
                return;
            }
            state.state = ConnectionState::Open;
            state.address.clone().unwrap_or_default()
        };

        tracing::info!(target: targets::CONNECTION, %address, "connection open");
        self.bus.dispatch(events::OPEN, &[Value::String(address)]);
    }

    fn handle_message(&self, id: HandleId, payload: String) {
        if !self.state.lock().is_current(id) {
            return;
        }

        match Envelope::decode(&payload) {
            Ok(envelope) => {
                let canonical = self.bus.canonical_name(&envelope.event);
                if events::is_reserved(canonical) {
                    tracing::warn!(
                        target: targets::CONNECTION,
                        event = %envelope.event,
                        "dropping remote event with a reserved name"
                    );
                    return;
                }
                self.bus.dispatch(&envelope.event, &envelope.data);
            }
            Err(err) => {
                tracing::warn!(target: targets::CONNECTION, error = %err, "undecodable payload");
                self.bus.dispatch(events::ERROR, &[err.to_payload()]);
            }
        }
    }

    fn handle_error(&self, id: HandleId, error: TransportError) {
        if !self.state.lock().is_current(id) {
            return;
        }

        tracing::warn!(target: targets::CONNECTION, error = %error, "transport error");
        self.bus.dispatch(events::ERROR, &[error.to_payload()]);
    }

    fn handle_closed(&self, id: HandleId, close: CloseEvent) {
        let after = {
            let mut state = self.state.lock();
            if !state.is_current(id) {
                return;
            }
            state.state = ConnectionState::Closed;

            if close.code.is_normal() {
                if !state.closed_by_client {
                    state.closed_by_server = true;
                }
                AfterClose::Stay
            } else if state.closed_by_client || !self.options.reconnect_enabled {
                AfterClose::Stay
            } else if self.options.should_reconnect(state.attempt) {
                AfterClose::Retry
            } else {
                AfterClose::GiveUp {
                    attempts: state.attempt,
                }
            }
        };

        tracing::info!(
            target: targets::CONNECTION,
            code = %close.code,
            reason = %close.reason,
            was_clean = close.was_clean,
            "connection closed"
        );
        self.bus.dispatch(events::CLOSE, &close.to_args());

        match after {
            AfterClose::Stay => {}
            AfterClose::Retry => self.schedule_reconnect(id),
            AfterClose::GiveUp { attempts } => {
                tracing::warn!(target: targets::CONNECTION, attempts, "giving up reconnecting");
                let error = TransportError::RetriesExhausted { attempts };
                self.bus.dispatch(events::ERROR, &[error.to_payload()]);
            }
        }
    }

    fn schedule_reconnect(&self, id: HandleId) {
        let delay = self.options.reconnect_interval_duration();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            if !delay.is_zero() {
                tracing::warn!(
                    target: targets::CONNECTION,
                    "no tokio runtime available for a delayed reconnect, reconnecting immediately"
                );
            }
            self.auto_reconnect(id);
            return;
        };

        // The abort handle is stored before the task can clear it
        let mut state = self.state.lock();
        if !state.is_current(id) || state.closed_by_client {
            return;
        }
        tracing::debug!(target: targets::CONNECTION, ?delay, "reconnect scheduled");
        let task = runtime.spawn(reconnect_after(self.this.clone(), id, delay));
        state.set_pending_reconnect(task.abort_handle());
    }

    fn auto_reconnect(&self, id: HandleId) {
        let plan = {
            let mut state = self.state.lock();
            state.clear_pending_reconnect();
            if !state.is_current(id)
                || state.closed_by_client
                || state.state != ConnectionState::Closed
            {
                tracing::debug!(target: targets::CONNECTION, "reconnect no longer needed");
                return;
            }
            match state.begin_reconnect(None) {
                Some(plan) => plan,
                None => return,
            }
        };

        if let Err(err) = self.run_reconnect(plan) {
            self.report_reconnect_failure(&err);
        }
    }

    fn report_reconnect_failure(&self, err: &Error) {
        tracing::warn!(target: targets::CONNECTION, error = %err, "automatic reconnect failed");
        self.bus.dispatch(events::ERROR, &[err.to_payload()]);
    }
}

impl TransportEventSink for ManagerInner {
    fn handle_transport_event(&self, handle: HandleId, event: TransportEvent) {
        if !self.state.lock().is_current(handle) {
            tracing::trace!(
                target: targets::CONNECTION,
                ?handle,
                "ignoring event from a superseded transport handle"
            );
            return;
        }

        match event {
            TransportEvent::Opened => self.handle_opened(handle),
            TransportEvent::Message(payload) => self.handle_message(handle, payload),
            TransportEvent::Error(error) => self.handle_error(handle, error),
            TransportEvent::Closed(close) => self.handle_closed(handle, close),
        }
    }
}

async fn reconnect_after(manager: Weak<ManagerInner>, id: HandleId, delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if let Some(manager) = manager.upgrade() {
        manager.auto_reconnect(id);
    }
}

fn close_retired(retired: RetiredHandle, code: Option<CloseCode>, reason: Option<&str>) {
    if let Some(handle) = retired {
        handle.close(code, reason.map(str::to_owned));
    }
}
