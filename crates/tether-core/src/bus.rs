//! Named-event publish/subscribe registry.
//!
//! An [`EventBus`] keeps, for every event name, an ordered list of
//! [`Listener`]s. Dispatching an event invokes the listeners registered for
//! it in registration order, passing a slice of JSON values as arguments.
//!
//! # Key Types
//!
//! - [`EventBus`] - The registry itself
//! - [`Listener`] - A clonable callback handle, compared by identity
//! - [`AliasTable`] - Maps alternate event names onto canonical ones
//!
//! # Aliases
//!
//! A bus built with [`EventBus::with_aliases`] resolves every event name
//! through its alias table before registering, removing or dispatching. An
//! alias and its canonical name are therefore the same channel: a listener
//! registered under either fires once per dispatch under either.
//!
//! # Fault Isolation
//!
//! A listener that panics does not prevent the remaining listeners of the
//! same dispatch from running. The fault is logged and re-dispatched on the
//! reserved [`LISTENER_FAULT_EVENT`] with `[event, message]` as arguments.
//!
//! # Re-entrancy
//!
//! Dispatch works on a snapshot of the listener list taken when it starts,
//! so listeners may register, unregister or dispatch from inside a callback.
//! Changes made during a dispatch take effect from the next dispatch on.
//!
//! # Example
//!
//! ```
//! use tether_core::{EventBus, Listener};
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//!
//! let greet = Listener::new(|args| println!("hello {}", args[0]));
//! bus.register("greet", greet.clone())
//!     .register("greet", greet.clone());
//!
//! // Fires twice: no duplicate detection
//! bus.dispatch("greet", &[json!("world")]);
//!
//! // Removes both occurrences
//! bus.unregister("greet", &greet);
//! assert_eq!(bus.listener_count("greet"), 0);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{BusError, Result};
use crate::logging::{panic_message, targets};

/// Reserved event on which listener panics are reported.
///
/// Arguments are `[event, message]`: the canonical name of the event whose
/// listener panicked, and the panic message.
pub const LISTENER_FAULT_EVENT: &str = "listener:fault";

type Callback = dyn Fn(&[Value]) + Send + Sync;

/// A listener callback.
///
/// Cloning a `Listener` yields a handle to the same callback; two handles
/// compare equal when they share the callback. This identity is what
/// [`EventBus::unregister`] matches on.
#[derive(Clone)]
pub struct Listener {
    callback: Arc<Callback>,
}

impl Listener {
    /// Wrap a closure into a listener handle.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Invoke the callback directly.
    pub fn call(&self, args: &[Value]) {
        (self.callback)(args);
    }

    /// Returns `true` if both handles refer to the same callback.
    pub fn same_as(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("callback", &Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// A table of event name aliases.
///
/// Each alias maps to exactly one canonical name. Canonical names are not
/// resolved further, so chains are not followed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    /// Create an empty alias table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias for a canonical event name.
    pub fn alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    /// Resolve an event name to its canonical name.
    pub fn resolve<'a>(&'a self, event: &'a str) -> &'a str {
        self.aliases.get(event).map_or(event, String::as_str)
    }

    /// All aliases registered for a canonical name, sorted.
    pub fn aliases_of(&self, canonical: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .aliases
            .iter()
            .filter(|(_, target)| target.as_str() == canonical)
            .map(|(alias, _)| alias.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Number of aliases in the table.
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Returns `true` if the table has no aliases.
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// An in-process publish/subscribe registry keyed by event name.
///
/// `EventBus` is `Send + Sync`; all methods take `&self` and return `&Self`
/// where chaining makes sense.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    aliases: AliasTable,
}

impl EventBus {
    /// Create a bus without aliases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus that resolves every event name through `aliases`.
    pub fn with_aliases(aliases: AliasTable) -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            aliases,
        }
    }

    /// The alias table this bus resolves names through.
    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Resolve an event name to the channel it is stored under.
    pub fn canonical_name<'a>(&'a self, event: &'a str) -> &'a str {
        self.aliases.resolve(event)
    }

    /// Append a listener to an event's sequence.
    ///
    /// The same listener may be registered several times and will then fire
    /// once per registration.
    pub fn register(&self, event: &str, listener: Listener) -> &Self {
        let event = self.aliases.resolve(event);
        self.listeners
            .lock()
            .entry(event.to_owned())
            .or_default()
            .push(listener);
        self
    }

    /// Register a closure and return its handle for later removal.
    pub fn on<F>(&self, event: &str, callback: F) -> Listener
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        let listener = Listener::new(callback);
        self.register(event, listener.clone());
        listener
    }

    /// Remove every occurrence of `listener` from an event's sequence.
    ///
    /// Does nothing if the event has no listeners or the listener was never
    /// registered for it. Other events are untouched.
    pub fn unregister(&self, event: &str, listener: &Listener) -> &Self {
        let event = self.aliases.resolve(event);
        let mut listeners = self.listeners.lock();
        if let Some(sequence) = listeners.get_mut(event) {
            sequence.retain(|registered| !registered.same_as(listener));
            if sequence.is_empty() {
                listeners.remove(event);
            }
        }
        self
    }

    /// Invoke every listener registered for `event`, in registration order.
    ///
    /// Does nothing if no listener is registered. A panicking listener is
    /// isolated: the remaining listeners still run and the fault is reported
    /// on [`LISTENER_FAULT_EVENT`].
    #[tracing::instrument(skip(self, args), target = "tether_core::bus", level = "trace")]
    pub fn dispatch(&self, event: &str, args: &[Value]) -> &Self {
        let event = self.aliases.resolve(event);
        let snapshot = match self.listeners.lock().get(event) {
            Some(sequence) => sequence.clone(),
            None => return self,
        };

        tracing::trace!(
            target: targets::BUS,
            listener_count = snapshot.len(),
            "dispatching {event}"
        );

        for listener in &snapshot {
            if let Err(fault) = Self::invoke(event, listener, args) {
                self.report_fault(fault);
            }
        }
        self
    }

    /// Number of listeners registered for an event (duplicates counted).
    pub fn listener_count(&self, event: &str) -> usize {
        let event = self.aliases.resolve(event);
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Returns `true` if at least one listener is registered for an event.
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    /// Canonical names of all events that currently have listeners, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Remove all listeners of one event.
    pub fn clear_event(&self, event: &str) -> &Self {
        let event = self.aliases.resolve(event);
        self.listeners.lock().remove(event);
        self
    }

    /// Remove every listener of every event.
    pub fn clear(&self) -> &Self {
        self.listeners.lock().clear();
        self
    }

    fn invoke(event: &str, listener: &Listener, args: &[Value]) -> Result<()> {
        panic::catch_unwind(AssertUnwindSafe(|| listener.call(args)))
            .map_err(|payload| BusError::listener_panicked(event, panic_message(payload.as_ref())))
    }

    fn report_fault(&self, fault: BusError) {
        tracing::error!(target: targets::BUS, error = %fault, "listener fault");

        let BusError::ListenerPanicked { event, message } = fault;
        // Faults raised by fault listeners are only logged
        if event == LISTENER_FAULT_EVENT {
            return;
        }
        self.dispatch(
            LISTENER_FAULT_EVENT,
            &[Value::String(event), Value::String(message)],
        );
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .field("aliases", &self.aliases.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = log.clone();
        Listener::new(move |args| {
            let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
            log.lock().push(format!("{tag}({})", rendered.join(",")));
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.register("tick", recorder(&log, "a"))
            .register("tick", recorder(&log, "b"))
            .register("tick", recorder(&log, "c"));

        bus.dispatch("tick", &[json!(1)]);

        assert_eq!(*log.lock(), vec!["a(1)", "b(1)", "c(1)"]);
    }

    #[test]
    fn test_dispatch_without_listeners_is_noop() {
        let bus = EventBus::new();
        bus.dispatch("nobody", &[json!("ignored")]);
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn test_duplicate_registration_fires_twice() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let listener = Listener::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.register("ping", listener.clone())
            .register("ping", listener.clone());

        bus.dispatch("ping", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count("ping"), 2);
    }

    #[test]
    fn test_unregister_removes_all_occurrences_for_one_event_only() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let shared = recorder(&log, "shared");
        let other = recorder(&log, "other");
        bus.register("a", shared.clone())
            .register("a", other.clone())
            .register("a", shared.clone())
            .register("b", shared.clone());

        bus.unregister("a", &shared);
        bus.dispatch("a", &[]).dispatch("b", &[]);

        assert_eq!(*log.lock(), vec!["other()", "shared()"]);
        assert_eq!(bus.listener_count("a"), 1);
        assert_eq!(bus.listener_count("b"), 1);
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let bus = EventBus::new();
        let stray = Listener::new(|_| {});

        bus.unregister("missing", &stray);
        bus.on("present", |_| {});
        bus.unregister("present", &stray);

        assert_eq!(bus.listener_count("present"), 1);
    }

    #[test]
    fn test_listener_identity() {
        let a = Listener::new(|_| {});
        let b = Listener::new(|_| {});

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_panicking_listener_does_not_abort_dispatch() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let faults = Arc::new(Mutex::new(Vec::new()));

        bus.register("work", recorder(&log, "before"));
        bus.on("work", |_| panic!("listener exploded"));
        bus.register("work", recorder(&log, "after"));

        let faults_clone = faults.clone();
        bus.on(LISTENER_FAULT_EVENT, move |args| {
            faults_clone.lock().push(args.to_vec());
        });

        bus.dispatch("work", &[json!(true)]);

        assert_eq!(*log.lock(), vec!["before(true)", "after(true)"]);
        assert_eq!(
            *faults.lock(),
            vec![vec![json!("work"), json!("listener exploded")]]
        );
    }

    #[test]
    fn test_panicking_fault_listener_is_not_recursive() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.on("work", |_| panic!("first"));
        let calls_clone = calls.clone();
        bus.on(LISTENER_FAULT_EVENT, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            panic!("second");
        });

        bus.dispatch("work", &[]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_aliases_share_one_channel() {
        let aliases = AliasTable::new()
            .alias("connect", "open")
            .alias("connected", "open");
        let bus = EventBus::with_aliases(aliases);
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.register("open", recorder(&log, "open"))
            .register("connect", recorder(&log, "connect"))
            .register("connected", recorder(&log, "connected"));

        bus.dispatch("open", &[json!("wss://x")]);
        assert_eq!(
            *log.lock(),
            vec!["open(\"wss://x\")", "connect(\"wss://x\")", "connected(\"wss://x\")"]
        );

        // Dispatching through an alias reaches the same listeners once each
        log.lock().clear();
        bus.dispatch("connect", &[]);
        assert_eq!(log.lock().len(), 3);

        assert_eq!(bus.event_names(), vec!["open".to_string()]);
        assert_eq!(bus.listener_count("connected"), 3);
    }

    #[test]
    fn test_unregister_through_alias() {
        let bus = EventBus::with_aliases(AliasTable::new().alias("disconnect", "close"));
        let listener = bus.on("disconnect", |_| {});

        assert_eq!(bus.listener_count("close"), 1);
        bus.unregister("close", &listener);
        assert!(!bus.has_listeners("disconnect"));
    }

    #[test]
    fn test_alias_table_queries() {
        let table = AliasTable::new()
            .alias("disconnected", "close")
            .alias("disconnect", "close")
            .alias("connect", "open");

        assert_eq!(table.resolve("disconnect"), "close");
        assert_eq!(table.resolve("close"), "close");
        assert_eq!(table.resolve("unrelated"), "unrelated");
        assert_eq!(table.aliases_of("close"), vec!["disconnect", "disconnected"]);
        assert_eq!(table.len(), 3);
        assert!(AliasTable::new().is_empty());
    }

    #[test]
    fn test_mutation_during_dispatch_does_not_deadlock() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let bus_clone = bus.clone();
        let count_clone = count.clone();
        bus.on("grow", move |_| {
            let count_inner = count_clone.clone();
            bus_clone.on("grow", move |_| {
                count_inner.fetch_add(1, Ordering::SeqCst);
            });
        });

        let bus_clone = bus.clone();
        let remover = Arc::new(Mutex::new(None::<Listener>));
        let remover_clone = remover.clone();
        let self_removing = bus.on("grow", move |_| {
            if let Some(me) = remover_clone.lock().take() {
                bus_clone.unregister("grow", &me);
            }
        });
        *remover.lock() = Some(self_removing);

        bus.dispatch("grow", &[]);
        // Listeners added during the first dispatch only fire from the next one
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count("grow"), 2);

        bus.dispatch("grow", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_dispatch() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let bus_clone = bus.clone();
        bus.on("outer", move |_| {
            bus_clone.dispatch("inner", &[json!("nested")]);
        });
        bus.register("inner", recorder(&log, "inner"));

        bus.dispatch("outer", &[]);
        assert_eq!(*log.lock(), vec!["inner(\"nested\")"]);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        bus.on("a", |_| {});
        bus.on("b", |_| {});

        bus.clear_event("a");
        assert_eq!(bus.event_names(), vec!["b".to_string()]);

        bus.clear();
        assert!(bus.event_names().is_empty());
    }

    #[test]
    fn test_dispatch_from_multiple_threads() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        bus.on("hit", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let mut handles = vec![];
        for i in 0..8 {
            let bus_clone = bus.clone();
            handles.push(std::thread::spawn(move || {
                bus_clone.dispatch("hit", &[json!(i)]);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 8);
    }
}
