//! Event host interface and an in-process implementation
//!
//! The controller never discovers handlers itself. It asks an [`EventHost`]
//! for the components it knows, registers one listener per offloaded
//! handler, and later removes those listeners through the returned
//! [`ListenerHandle`]s. [`LocalEventBus`] is a self-contained host for
//! embedding and tests.

#![forbid(unsafe_code)]

//     ______   __  __     __         ______     ______
//    /\  == \ /\ \/\ \   /\ \       /\  ___\   /\  ___\
//    \ \  _-/ \ \ \_\ \  \ \ \____  \ \___  \  \ \  __\
//     \ \_\    \ \_____\  \ \_____\  \/\_____\  \ \_____\
//      \/_/     \/_____/   \/_____/   \/_____/   \/_____/
//
// Author: Colin MacRitchie / Ripple Group
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::observer::TaskResult;
use crate::owner::{EventPriority, OwnerId};

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

/// Callable body of a handler
pub type Handler = Arc<dyn Fn() -> TaskResult + Send + Sync>;

/// Invoked synchronously by the host when a registered listener fires
pub type FireCallback = Arc<dyn Fn() + Send + Sync>;

/// One interceptable handler of a component
#[derive(Clone)]
pub struct HandlerDescriptor {
    /// Event category the handler listens to
    pub category: String,
    /// Declared handler priority
    pub priority: EventPriority,
    /// Skip delivery of cancelled events
    pub ignore_cancelled: bool,
    /// Handler body
    pub invoke: Handler,
}

impl HandlerDescriptor {
    /// Descriptor for `invoke` listening to `category` at `priority`
    pub fn new<F>(category: impl Into<String>, priority: EventPriority, invoke: F) -> Self
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        Self {
            category: category.into(),
            priority,
            ignore_cancelled: false,
            invoke: Arc::new(invoke),
        }
    }

    /// Sets the ignore-cancelled flag
    #[must_use]
    pub fn ignore_cancelled(mut self, ignore: bool) -> Self {
        self.ignore_cancelled = ignore;
        self
    }

    /// Registration mirroring this handler's delivery options
    #[must_use]
    pub fn registration(&self) -> Registration {
        Registration {
            category: self.category.clone(),
            priority: self.priority,
            ignore_cancelled: self.ignore_cancelled,
        }
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("ignore_cancelled", &self.ignore_cancelled)
            .finish_non_exhaustive()
    }
}

/// A component and its handlers
#[derive(Debug, Clone)]
pub struct Component {
    /// Owning component
    pub owner: OwnerId,
    /// Handlers declared by the component
    pub handlers: Vec<HandlerDescriptor>,
}

impl Component {
    /// Component with no handlers
    pub fn new(owner: impl Into<OwnerId>) -> Self {
        Self {
            owner: owner.into(),
            handlers: Vec::new(),
        }
    }

    /// Adds a handler
    #[must_use]
    pub fn with_handler(mut self, handler: HandlerDescriptor) -> Self {
        self.handlers.push(handler);
        self
    }
}

/// Delivery options for a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Event category
    pub category: String,
    /// Delivery order among listeners of the category
    pub priority: EventPriority,
    /// Skip delivery of cancelled events
    pub ignore_cancelled: bool,
}

/// Token for listeners registered in one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    /// Raw handle value
    #[inline]
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Component/event host collaborator
pub trait EventHost: Send + Sync {
    /// Components currently installed, with their handlers
    fn components(&self) -> Vec<Component>;

    /// Registers `on_fire` for events matching `registration` on behalf of `owner`
    fn register(
        &self,
        owner: &OwnerId,
        registration: Registration,
        on_fire: FireCallback,
    ) -> Result<ListenerHandle, HostError>;

    /// Removes every listener registered under `handle`
    fn unregister_all(&self, handle: ListenerHandle);
}

/// Host errors
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The owner is not installed in the host
    #[error("Unknown component: {0}")]
    UnknownOwner(OwnerId),

    /// The host refused the registration
    #[error("Registration of {category} for {owner} rejected: {reason}")]
    Rejected {
        /// Owner the listener was registered for
        owner: OwnerId,
        /// Event category
        category: String,
        /// Host-provided reason
        reason: String,
    },
}

struct Listener {
    handle: ListenerHandle,
    owner: OwnerId,
    registration: Registration,
    on_fire: FireCallback,
}

/// In-process event host.
///
/// `fire` delivers to matching listeners on the calling thread, lowest
/// priority first, in registration order within one priority.
#[derive(Default)]
pub struct LocalEventBus {
    components: RwLock<Vec<Component>>,
    listeners: RwLock<Vec<Listener>>,
    next_handle: AtomicU64,
}

impl LocalEventBus {
    /// Creates an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a component; replaces one with the same owner
    pub fn add_component(&self, component: Component) {
        let mut components = self.components.write();
        components.retain(|existing| existing.owner != component.owner);
        components.push(component);
    }

    /// Removes a component and every listener registered for it
    pub fn remove_component(&self, owner: &OwnerId) {
        self.components.write().retain(|existing| &existing.owner != owner);
        self.listeners.write().retain(|listener| &listener.owner != owner);
    }

    /// Delivers an event of `category`.
    ///
    /// Returns how many listeners were invoked.
    pub fn fire(&self, category: &str, cancelled: bool) -> usize {
        // Collect first so callbacks never run under the lock
        let mut matching: Vec<(EventPriority, FireCallback)> = self
            .listeners
            .read()
            .iter()
            .filter(|listener| listener.registration.category == category)
            .filter(|listener| !(cancelled && listener.registration.ignore_cancelled))
            .map(|listener| (listener.registration.priority, Arc::clone(&listener.on_fire)))
            .collect();
        matching.sort_by_key(|(priority, _)| *priority);

        #[cfg(feature = "tracing")]
        trace!(category, cancelled, listeners = matching.len(), "Firing event");

        for (_, on_fire) in &matching {
            on_fire();
        }
        matching.len()
    }

    /// Registered listener count
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Listeners registered for `category`
    pub fn listeners_for(&self, category: &str) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|listener| listener.registration.category == category)
            .count()
    }
}

impl EventHost for LocalEventBus {
    fn components(&self) -> Vec<Component> {
        self.components.read().clone()
    }

    fn register(
        &self,
        owner: &OwnerId,
        registration: Registration,
        on_fire: FireCallback,
    ) -> Result<ListenerHandle, HostError> {
        if !self.components.read().iter().any(|c| &c.owner == owner) {
            return Err(HostError::UnknownOwner(owner.clone()));
        }

        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        #[cfg(feature = "tracing")]
        debug!(
            owner = %owner,
            category = %registration.category,
            priority = ?registration.priority,
            handle = handle.id(),
            "Listener registered"
        );

        self.listeners.write().push(Listener {
            handle,
            owner: owner.clone(),
            registration,
            on_fire,
        });
        Ok(handle)
    }

    fn unregister_all(&self, handle: ListenerHandle) {
        self.listeners.write().retain(|listener| listener.handle != handle);
    }
}

impl fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEventBus")
            .field("components", &self.components.read().len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn registration(category: &str, priority: EventPriority, ignore_cancelled: bool) -> Registration {
        Registration {
            category: category.to_string(),
            priority,
            ignore_cancelled,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> FireCallback {
        let log = Arc::clone(log);
        Arc::new(move || log.lock().push(name))
    }

    #[test]
    fn test_register_requires_known_owner() {
        let bus = LocalEventBus::new();
        let result = bus.register(
            &OwnerId::from("Ghost"),
            registration("ChatEvent", EventPriority::Normal, false),
            Arc::new(|| {}),
        );
        assert!(matches!(result, Err(HostError::UnknownOwner(_))));
    }

    #[test]
    fn test_fire_orders_by_priority() {
        let bus = LocalEventBus::new();
        let owner = OwnerId::from("Shops");
        bus.add_component(Component::new(owner.clone()));
        let log = Arc::new(Mutex::new(Vec::new()));

        for (priority, name) in [
            (EventPriority::Monitor, "monitor"),
            (EventPriority::High, "high"),
            (EventPriority::Lowest, "lowest"),
            (EventPriority::Normal, "normal"),
        ] {
            bus.register(&owner, registration("ChatEvent", priority, false), recorder(&log, name))
                .expect("register");
        }
        bus.register(&owner, registration("MoveEvent", EventPriority::Low, false), recorder(&log, "other"))
            .expect("register");

        assert_eq!(bus.fire("ChatEvent", false), 4);
        assert_eq!(*log.lock(), vec!["lowest", "normal", "high", "monitor"]);
    }

    #[test]
    fn test_cancelled_events_skip_ignoring_listeners() {
        let bus = LocalEventBus::new();
        let owner = OwnerId::from("Shops");
        bus.add_component(Component::new(owner.clone()));
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.register(&owner, registration("ChatEvent", EventPriority::Normal, true), recorder(&log, "skips"))
            .expect("register");
        bus.register(&owner, registration("ChatEvent", EventPriority::Normal, false), recorder(&log, "sees"))
            .expect("register");

        assert_eq!(bus.fire("ChatEvent", true), 1);
        assert_eq!(*log.lock(), vec!["sees"]);
    }

    #[test]
    fn test_unregister_all_by_handle() {
        let bus = LocalEventBus::new();
        let owner = OwnerId::from("Shops");
        bus.add_component(Component::new(owner.clone()));

        let first = bus
            .register(&owner, registration("ChatEvent", EventPriority::Normal, false), Arc::new(|| {}))
            .expect("register");
        bus.register(&owner, registration("ChatEvent", EventPriority::High, false), Arc::new(|| {}))
            .expect("register");

        bus.unregister_all(first);
        assert_eq!(bus.listener_count(), 1);

        bus.remove_component(&owner);
        assert_eq!(bus.listener_count(), 0);
        assert!(bus.components().is_empty());
    }

    #[test]
    fn test_descriptor_registration() {
        let handler = HandlerDescriptor::new("BlockBreakEvent", EventPriority::High, || Ok(()))
            .ignore_cancelled(true);
        let registration = handler.registration();

        assert_eq!(registration.category, "BlockBreakEvent");
        assert_eq!(registration.priority, EventPriority::High);
        assert!(registration.ignore_cancelled);
        assert!((handler.invoke)().is_ok());
    }
}
