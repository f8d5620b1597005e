//! Connection lifecycle state.

use std::sync::Arc;

use slotmap::SlotMap;
use tokio::task::AbortHandle;

use crate::transport::{HandleId, TransportHandle};

/// Lifecycle state of a managed connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected; no transport handle exists.
    #[default]
    Idle,
    /// A transport handle is opening.
    Connecting,
    /// The transport reported the connection open.
    Open,
    /// The client asked the transport to close.
    Closing,
    /// The transport reported the connection closed.
    Closed,
}

impl ConnectionState {
    /// Returns true if the connection is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true while a handle is opening or closing.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A handle that was taken out of service and still needs closing.
pub(crate) type RetiredHandle = Option<Arc<dyn TransportHandle>>;

/// Work prepared under the state lock for one reconnection attempt.
pub(crate) struct ReconnectPlan {
    pub retired: RetiredHandle,
    pub attempt: u32,
    pub address: String,
}

/// Mutable state of a connection manager, guarded by one mutex.
#[derive(Default)]
pub(crate) struct ManagerState {
    pub state: ConnectionState,
    pub address: Option<String>,
    pub attempt: u32,
    pub closed_by_client: bool,
    pub closed_by_server: bool,
    /// Holds at most one entry: the current handle. `None` while its open is in flight.
    handles: SlotMap<HandleId, Option<Arc<dyn TransportHandle>>>,
    current: Option<HandleId>,
    pending_reconnect: Option<AbortHandle>,
}

impl ManagerState {
    pub fn new(address: Option<String>) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Whether `id` identifies the current handle.
    pub fn is_current(&self, id: HandleId) -> bool {
        self.current == Some(id)
    }

    /// Whether any handle exists, opened or not.
    pub fn has_handle(&self) -> bool {
        self.current.is_some()
    }

    /// The current handle, once its open call returned.
    pub fn current_handle(&self) -> Option<Arc<dyn TransportHandle>> {
        self.current
            .and_then(|id| self.handles.get(id))
            .and_then(|slot| slot.clone())
    }

    /// Take the current handle out of service.
    pub fn retire_current(&mut self) -> RetiredHandle {
        let id = self.current.take()?;
        self.handles.remove(id).flatten()
    }

    /// Retire the current handle and reserve a key for its successor.
    pub fn reserve_handle(&mut self) -> (HandleId, RetiredHandle) {
        let retired = self.retire_current();
        let id = self.handles.insert(None);
        self.current = Some(id);
        self.state = ConnectionState::Connecting;
        (id, retired)
    }

    /// Store the handle returned by the transport for a reserved key.
    ///
    /// Gives the handle back if the key was superseded while opening.
    pub fn install_handle(
        &mut self,
        id: HandleId,
        handle: Arc<dyn TransportHandle>,
    ) -> RetiredHandle {
        match self.handles.get_mut(id) {
            Some(slot) => {
                *slot = Some(handle);
                None
            }
            None => Some(handle),
        }
    }

    /// Forget a reserved key whose open call failed.
    pub fn abandon_handle(&mut self, id: HandleId) {
        if self.is_current(id) {
            self.handles.remove(id);
            self.current = None;
            self.state = ConnectionState::Closed;
        }
    }

    /// Prepare a reconnection attempt: bump the counter and retire the handle.
    pub fn begin_reconnect(&mut self, address: Option<&str>) -> Option<ReconnectPlan> {
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            self.address = Some(address.to_owned());
        }
        let address = self.address.clone()?;
        self.cancel_pending_reconnect();
        self.closed_by_client = false;
        self.closed_by_server = false;
        self.attempt += 1;
        Some(ReconnectPlan {
            retired: self.retire_current(),
            attempt: self.attempt,
            address,
        })
    }

    pub fn set_pending_reconnect(&mut self, task: AbortHandle) {
        self.cancel_pending_reconnect();
        self.pending_reconnect = Some(task);
    }

    pub fn clear_pending_reconnect(&mut self) {
        self.pending_reconnect = None;
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    pub fn cancel_pending_reconnect(&mut self) {
        if let Some(task) = self.pending_reconnect.take() {
            task.abort();
        }
    }
}
