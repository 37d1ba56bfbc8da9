//! # Entity
//!
//! An entity is a named bag of attributes driven by extensions. It owns:
//! - One [`PropertyStore`] (triple-buffered attributes)
//! - One [`ActionDispatcher`] (multicast action table)
//! - The attached extensions, keyed by unique name
//!
//! Every one of these is guarded by its own lock. Operations touching two of
//! them take the locks one after the other, never nested.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::extension::{Extension, ExtensionHost, SystemId};
use crate::action::{ActionDispatcher, ActionHandler};
use crate::error::{require, CoreError, CoreResult};
use crate::sync::PropertyStore;
use crate::value::Value;

/// Notification fired when the extension set of an entity changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityEvent {
    /// An extension was attached and performed its initial flush.
    ExtensionAdded {
        /// Entity name.
        entity: String,
        /// Extension name.
        extension: String,
        /// System the extension references.
        system: SystemId,
    },
    /// An extension was detached.
    ExtensionRemoved {
        /// Entity name.
        entity: String,
        /// Extension name.
        extension: String,
        /// System the extension referenced.
        system: SystemId,
    },
}

/// Callback receiving [`EntityEvent`]s.
pub type EntityListener = Arc<dyn Fn(&EntityEvent) + Send + Sync>;

/// Handle returned by [`Entity::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A named simulation object.
///
/// Always lives behind an `Arc`: extensions keep a weak reference back to it.
pub struct Entity {
    name: String,
    owner: RwLock<Option<String>>,
    properties: PropertyStore,
    actions: ActionDispatcher,
    extensions: RwLock<BTreeMap<String, Arc<ExtensionHost>>>,
    listeners: RwLock<Vec<(ListenerId, EntityListener)>>,
    next_listener: AtomicU64,
    disposed: AtomicBool,
}

impl Entity {
    /// Creates an entity with a fresh property store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyArgument`] if `name` is empty.
    pub fn new(name: impl Into<String>) -> CoreResult<Arc<Self>> {
        let name = name.into();
        require(&name, "entity name")?;
        Ok(Arc::new(Self {
            name,
            owner: RwLock::new(None),
            properties: PropertyStore::new(),
            actions: ActionDispatcher::new(),
            extensions: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }))
    }

    /// Entity name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the scene the entity was added to, if any.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        self.owner.read().clone()
    }

    pub(crate) fn set_owner(&self, owner: Option<String>) {
        *self.owner.write() = owner;
    }

    /// The attribute store.
    #[inline]
    #[must_use]
    pub const fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    /// The action table.
    #[inline]
    #[must_use]
    pub const fn actions(&self) -> &ActionDispatcher {
        &self.actions
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Publishes an attribute for the current tick.
    ///
    /// # Errors
    ///
    /// See [`PropertyStore::publicize`].
    pub fn publicize(&self, key: impl Into<String>, value: impl Into<Value>) -> CoreResult<()> {
        self.properties.publicize(key, value)
    }

    /// Reads a flushed attribute.
    #[must_use]
    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        self.properties.get_attribute(key)
    }

    /// Commits this tick's publications. Returns the number of keys merged.
    pub fn swap_and_flush(&self) -> usize {
        self.properties.swap_and_flush()
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// See [`ActionDispatcher::register_action_handler`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyArgument`] if `key` is empty.
    pub fn register_action_handler(&self, key: &str, handler: ActionHandler) -> CoreResult<()> {
        self.actions.register_action_handler(key, handler)
    }

    /// See [`ActionDispatcher::unregister_action_handler`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyArgument`] if `key` is empty.
    pub fn unregister_action_handler(
        &self,
        key: &str,
        handler: &ActionHandler,
        remove_all: bool,
    ) -> CoreResult<usize> {
        self.actions.unregister_action_handler(key, handler, remove_all)
    }

    /// See [`ActionDispatcher::request_action`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyArgument`] if `sender` or `key` is empty.
    pub fn request_action(&self, sender: &str, key: &str, params: Vec<Value>) -> CoreResult<usize> {
        self.actions.request_action(sender, key, params)
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Attaches an extension.
    ///
    /// 1. Inserts it into the extension table
    /// 2. Wires its action keys to its request queue
    /// 3. Lets it attach and publish an initial snapshot
    /// 4. Flushes, so first-tick readers see its data
    /// 5. Fires [`EntityEvent::ExtensionAdded`]
    ///
    /// If step 2 or 3 fails the attachment is rolled back and
    /// [`EntityEvent::ExtensionRemoved`] fires, so a listener that saw the
    /// extension in a snapshot while it was attaching can uncount it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EmptyArgument`] if the extension name is empty.
    /// - [`CoreError::EntityDisposed`] once [`Entity::dispose`] ran.
    /// - [`CoreError::DuplicateExtension`] if the name is taken.
    /// - Whatever the extension's attach or publish hook returns.
    pub fn add_extension(self: &Arc<Self>, extension: Box<dyn Extension>) -> CoreResult<Arc<ExtensionHost>> {
        require(extension.name(), "extension name")?;
        let host = Arc::new(ExtensionHost::new(extension, Arc::downgrade(self)));

        {
            let mut table = self.extensions.write();
            // Dispose sets the flag before it empties the table.
            if self.is_disposed() {
                return Err(CoreError::EntityDisposed(self.name.clone()));
            }
            if table.contains_key(host.name()) {
                return Err(CoreError::DuplicateExtension(host.name().to_owned()));
            }
            table.insert(host.name().to_owned(), Arc::clone(&host));
        }

        if let Err(e) = self.wire(&host).and_then(|()| host.attach(self)) {
            self.roll_back(&host);
            tracing::warn!(entity = %self.name, extension = host.name(), error = %e, "attach failed");
            return Err(e);
        }

        self.properties.swap_and_flush();
        tracing::debug!(entity = %self.name, extension = host.name(), system = %host.system(), "extension attached");

        self.notify(&EntityEvent::ExtensionAdded {
            entity: self.name.clone(),
            extension: host.name().to_owned(),
            system: host.system().clone(),
        });
        Ok(host)
    }

    /// Detaches and disposes an extension.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExtensionNotFound`] if no extension has that name.
    pub fn remove_extension(&self, name: &str) -> CoreResult<()> {
        require(name, "extension name")?;
        let host = self
            .extensions
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::ExtensionNotFound(name.to_owned()))?;

        self.teardown(&host);
        Ok(())
    }

    /// Looks up an attached extension.
    #[must_use]
    pub fn extension(&self, name: &str) -> Option<Arc<ExtensionHost>> {
        self.extensions.read().get(name).cloned()
    }

    /// All attached extensions, ordered by name.
    #[must_use]
    pub fn extensions(&self) -> Vec<Arc<ExtensionHost>> {
        self.extensions.read().values().cloned().collect()
    }

    /// Returns true if an extension with that name is attached.
    #[must_use]
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.read().contains_key(name)
    }

    /// Number of attached extensions.
    #[must_use]
    pub fn extension_count(&self) -> usize {
        self.extensions.read().len()
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Per-tick flush.
    ///
    /// Fires the "update requested" notification on every extension so each
    /// publishes fresh values, then swaps and flushes. The flush always runs;
    /// the first publication error is returned afterwards.
    ///
    /// # Errors
    ///
    /// The first error an extension's publish hook returned.
    pub fn update(&self) -> CoreResult<()> {
        let mut first_error = None;
        for host in self.extensions() {
            if let Err(e) = host.publish(self) {
                tracing::error!(entity = %self.name, extension = host.name(), error = %e, "publish failed");
                first_error.get_or_insert(e);
            }
        }

        self.properties.swap_and_flush();
        first_error.map_or(Ok(()), Err)
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Registers a listener for extension changes.
    pub fn subscribe(&self, listener: EntityListener) -> ListenerId {
        self.subscribe_with_snapshot(listener).0
    }

    /// Registers a listener and returns the extensions attached at that moment.
    ///
    /// Registration and snapshot happen under the extension table lock, so
    /// every attach/detach is either in the snapshot or delivered as an event
    /// (or, for an attach racing the call, possibly both).
    pub fn subscribe_with_snapshot(&self, listener: EntityListener) -> (ListenerId, Vec<(String, SystemId)>) {
        let table = self.extensions.read();
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        let attached = table
            .values()
            .map(|h| (h.name().to_owned(), h.system().clone()))
            .collect();
        (id, attached)
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Detaches and disposes every extension, then clears the store.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let hosts: Vec<_> = std::mem::take(&mut *self.extensions.write())
            .into_values()
            .collect();
        for host in &hosts {
            self.teardown(host);
        }

        self.actions.clear();
        self.properties.clear();
        self.listeners.write().clear();
        tracing::debug!(entity = %self.name, "entity disposed");
    }

    /// Returns true once [`Entity::dispose`] ran.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn wire(&self, host: &ExtensionHost) -> CoreResult<()> {
        for key in host.action_keys() {
            self.actions.register_action_handler(key, Arc::clone(host.binding()))?;
        }
        Ok(())
    }

    fn roll_back(&self, host: &ExtensionHost) {
        self.unwire(host);
        self.extensions.write().remove(host.name());
        self.notify(&EntityEvent::ExtensionRemoved {
            entity: self.name.clone(),
            extension: host.name().to_owned(),
            system: host.system().clone(),
        });
    }

    fn unwire(&self, host: &ExtensionHost) {
        for key in host.action_keys() {
            // Keys were validated when wired.
            let _ = self.actions.unregister_action_handler(key, host.binding(), true);
        }
    }

    fn teardown(&self, host: &ExtensionHost) {
        self.unwire(host);
        self.notify(&EntityEvent::ExtensionRemoved {
            entity: self.name.clone(),
            extension: host.name().to_owned(),
            system: host.system().clone(),
        });
        host.detach_and_dispose(self);
        tracing::debug!(entity = %self.name, extension = host.name(), "extension detached");
    }

    fn notify(&self, event: &EntityEvent) {
        let listeners: Vec<EntityListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &listeners {
            listener(event);
        }
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("owner", &self.owner())
            .field("attributes", &self.properties.len())
            .field("extensions", &self.extensions.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{handler, ActionRequest};
    use crate::ecs::extension::ExtensionContext;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Publishes a counter every tick and records handled requests.
    struct Thruster {
        name: &'static str,
        ticks: i64,
        fired: Arc<Mutex<Vec<String>>>,
        disposed: Arc<AtomicBool>,
    }

    impl Thruster {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                ticks: 0,
                fired: Arc::new(Mutex::new(Vec::new())),
                disposed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Extension for Thruster {
        fn name(&self) -> &str {
            self.name
        }

        fn system(&self) -> SystemId {
            SystemId::new("propulsion")
        }

        fn action_keys(&self) -> Vec<String> {
            vec!["fire".into()]
        }

        fn publish(&mut self, ctx: &ExtensionContext<'_>) -> CoreResult<()> {
            ctx.publicize(format!("{}.ticks", self.name), self.ticks)?;
            self.ticks += 1;
            Ok(())
        }

        fn handle_action(&mut self, request: &ActionRequest, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
            self.fired.lock().push(request.sender().to_owned());
            Ok(())
        }

        fn dispose(&mut self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_attach_publishes_initial_snapshot() {
        let ship = Entity::new("ship").unwrap();
        ship.add_extension(Box::new(Thruster::new("main"))).unwrap();

        assert_eq!(ship.get_attribute("main.ticks"), Some(Value::Int(0)));
        assert_eq!(ship.extension_count(), 1);
    }

    #[test]
    fn test_duplicate_extension_name() {
        let ship = Entity::new("ship").unwrap();
        ship.add_extension(Box::new(Thruster::new("main"))).unwrap();

        let err = ship.add_extension(Box::new(Thruster::new("main"))).unwrap_err();
        assert_eq!(err, CoreError::DuplicateExtension("main".into()));
        assert_eq!(ship.actions().handler_count("fire"), 1);
    }

    #[test]
    fn test_remove_unknown_extension() {
        let ship = Entity::new("ship").unwrap();
        assert_eq!(
            ship.remove_extension("ghost"),
            Err(CoreError::ExtensionNotFound("ghost".into()))
        );
    }

    #[test]
    fn test_update_requests_fresh_values() {
        let ship = Entity::new("ship").unwrap();
        ship.add_extension(Box::new(Thruster::new("main"))).unwrap();

        ship.update().unwrap();
        ship.update().unwrap();
        assert_eq!(ship.get_attribute("main.ticks"), Some(Value::Int(2)));
    }

    #[test]
    fn test_requests_are_queued_until_extension_update() {
        let ship = Entity::new("ship").unwrap();
        let thruster = Thruster::new("main");
        let fired = Arc::clone(&thruster.fired);
        let host = ship.add_extension(Box::new(thruster)).unwrap();

        ship.request_action("pilot", "fire", vec![]).unwrap();
        ship.request_action("autopilot", "fire", vec![]).unwrap();
        assert!(fired.lock().is_empty());
        assert_eq!(host.pending_requests(), 2);

        assert_eq!(host.update().unwrap(), 2);
        assert_eq!(*fired.lock(), vec!["pilot".to_owned(), "autopilot".to_owned()]);
    }

    #[test]
    fn test_undeclared_key_is_a_protocol_violation() {
        let ship = Entity::new("ship").unwrap();
        let host = ship.add_extension(Box::new(Thruster::new("main"))).unwrap();

        host.enqueue(Arc::new(ActionRequest::new("pilot", "warp", vec![])));
        host.enqueue(Arc::new(ActionRequest::new("pilot", "fire", vec![])));

        let err = host.update().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(host.pending_requests(), 1);
    }

    #[test]
    fn test_remove_extension_unwires_and_disposes() {
        let ship = Entity::new("ship").unwrap();
        let thruster = Thruster::new("main");
        let disposed = Arc::clone(&thruster.disposed);
        ship.add_extension(Box::new(thruster)).unwrap();

        ship.remove_extension("main").unwrap();
        assert!(disposed.load(Ordering::SeqCst));
        assert!(!ship.actions().has_handlers("fire"));
        assert_eq!(ship.request_action("pilot", "fire", vec![]).unwrap(), 0);
    }

    #[test]
    fn test_listeners_see_attach_and_detach() {
        let ship = Entity::new("ship").unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        let id = ship.subscribe(Arc::new(move |event: &EntityEvent| e.lock().push(event.clone())));

        ship.add_extension(Box::new(Thruster::new("main"))).unwrap();
        ship.remove_extension("main").unwrap();

        {
            let events = events.lock();
            assert_eq!(events.len(), 2);
            assert!(matches!(events[0], EntityEvent::ExtensionAdded { .. }));
            assert!(matches!(events[1], EntityEvent::ExtensionRemoved { .. }));
        }

        assert!(ship.unsubscribe(id));
        assert!(!ship.unsubscribe(id));
    }

    #[test]
    fn test_dispose_tears_everything_down() {
        let ship = Entity::new("ship").unwrap();
        let thruster = Thruster::new("main");
        let disposed = Arc::clone(&thruster.disposed);
        ship.add_extension(Box::new(thruster)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        ship.register_action_handler("ping", handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        ship.dispose();
        assert!(ship.is_disposed());
        assert!(disposed.load(Ordering::SeqCst));
        assert!(ship.properties().is_empty());
        assert_eq!(ship.request_action("x", "ping", vec![]).unwrap(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_entity_name() {
        assert_eq!(
            Entity::new("").unwrap_err(),
            CoreError::EmptyArgument("entity name")
        );
    }
}
