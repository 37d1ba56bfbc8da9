//! # Extensions
//!
//! An extension is a pluggable unit of behavior attached to one entity. It
//! declares the action keys it handles, publishes attributes when the entity
//! asks for fresh data, and runs its own update on the thread of the system it
//! belongs to.
//!
//! ## Request Flow
//!
//! ```text
//! request_action("fire")
//!        │
//!        ▼
//! ┌──────────────┐  binding   ┌─────────────────┐  update()  ┌────────────────┐
//! │  Dispatcher  │──────────> │ host queue      │──────────> │ handle_action  │
//! │ (any thread) │  enqueue   │ (crossbeam FIFO)│  drain     │ (system thread)│
//! └──────────────┘            └─────────────────┘            └────────────────┘
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::action::{handler, ActionHandler, ActionRequest};
use crate::ecs::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// Opaque identifier of the external system that drives an extension.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemId(String);

impl SystemId {
    /// Creates a system id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SystemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Behavior plugged into an entity.
///
/// Every hook has a default so an extension only implements what it needs.
/// Hooks run with the extension locked: they must not remove their own
/// extension from the entity.
pub trait Extension: Send {
    /// Name, unique per entity.
    fn name(&self) -> &str;

    /// The system whose task loop drives [`Extension::update`].
    fn system(&self) -> SystemId;

    /// Action keys this extension handles. Read once, at attach time.
    fn action_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once when attached, before the initial publication.
    ///
    /// # Errors
    ///
    /// Any error aborts the attachment.
    fn on_attach(&mut self, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// The entity is about to flush: publish fresh attribute values now.
    ///
    /// # Errors
    ///
    /// Publication errors are protocol violations and must be returned.
    fn publish(&mut self, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Handles one queued request for a key listed in [`Extension::action_keys`].
    ///
    /// # Errors
    ///
    /// Errors stop the drain and surface from [`ExtensionHost::update`].
    fn handle_action(
        &mut self,
        _request: &ActionRequest,
        _ctx: &ExtensionContext<'_>,
    ) -> CoreResult<()> {
        Ok(())
    }

    /// Per-tick logic, after the queue was drained.
    ///
    /// # Errors
    ///
    /// Errors surface from [`ExtensionHost::update`].
    fn update(&mut self, _ctx: &ExtensionContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    /// Called when detached from the entity.
    fn on_detach(&mut self, _ctx: &ExtensionContext<'_>) {}

    /// Final teardown. Called exactly once.
    fn dispose(&mut self) {}
}

/// What an extension sees of its entity while a hook runs.
pub struct ExtensionContext<'a> {
    entity: &'a Entity,
    extension: &'a str,
}

impl<'a> ExtensionContext<'a> {
    pub(crate) const fn new(entity: &'a Entity, extension: &'a str) -> Self {
        Self { entity, extension }
    }

    /// The owning entity.
    #[must_use]
    pub const fn entity(&self) -> &'a Entity {
        self.entity
    }

    /// Name of the extension running the hook.
    #[must_use]
    pub const fn extension_name(&self) -> &'a str {
        self.extension
    }

    /// Publishes into the entity's unstable buffer.
    ///
    /// # Errors
    ///
    /// See [`crate::PropertyStore::publicize`].
    pub fn publicize(&self, key: impl Into<String>, value: impl Into<Value>) -> CoreResult<()> {
        self.entity.publicize(key, value)
    }

    /// Reads a flushed attribute of the entity.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.entity.get_attribute(key)
    }

    /// Requests an action on the entity, sent under this extension's name.
    ///
    /// # Errors
    ///
    /// See [`crate::ActionDispatcher::request_action`].
    pub fn request_action(&self, key: &str, params: Vec<Value>) -> CoreResult<usize> {
        self.entity.request_action(self.extension, key, params)
    }
}

/// An attached extension: the logic plus its request queue.
///
/// Created by [`Entity::add_extension`]. Holds a non-owning reference to the
/// entity.
pub struct ExtensionHost {
    name: String,
    system: SystemId,
    action_keys: Vec<String>,
    logic: Mutex<Box<dyn Extension>>,
    queue_tx: Sender<Arc<ActionRequest>>,
    queue_rx: Receiver<Arc<ActionRequest>>,
    binding: ActionHandler,
    owner: Weak<Entity>,
}

impl ExtensionHost {
    pub(crate) fn new(logic: Box<dyn Extension>, owner: Weak<Entity>) -> Self {
        let name = logic.name().to_owned();
        let system = logic.system();
        let action_keys = logic.action_keys();
        let (queue_tx, queue_rx) = unbounded();

        let tx = queue_tx.clone();
        let tag = name.clone();
        let binding = handler(move |request| {
            if tx.send(Arc::clone(request)).is_err() {
                tracing::warn!(extension = %tag, key = request.key(), "request queue closed");
            }
        });

        Self {
            name,
            system,
            action_keys,
            logic: Mutex::new(logic),
            queue_tx,
            queue_rx,
            binding,
            owner,
        }
    }

    /// Extension name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// System driving this extension.
    #[must_use]
    pub const fn system(&self) -> &SystemId {
        &self.system
    }

    /// Keys wired into the entity's dispatcher.
    #[must_use]
    pub fn action_keys(&self) -> &[String] {
        &self.action_keys
    }

    /// Number of queued requests.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.queue_rx.len()
    }

    /// Queues a request directly, bypassing the dispatcher.
    pub fn enqueue(&self, request: Arc<ActionRequest>) {
        // The host owns the receiver, the send cannot fail.
        let _ = self.queue_tx.send(request);
    }

    /// Drains the request queue in FIFO order, then runs the extension update.
    ///
    /// Only requests queued before the call are drained; anything the handlers
    /// request on the way waits for the next update. Returns the number of
    /// requests handled.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Detached`] if the entity is gone.
    /// - [`CoreError::UnhandledAction`] for a request whose key was never
    ///   declared. Requests queued behind it stay queued.
    /// - Anything the extension hooks return.
    pub fn update(&self) -> CoreResult<usize> {
        let entity = self
            .owner
            .upgrade()
            .ok_or_else(|| CoreError::Detached(self.name.clone()))?;
        let ctx = ExtensionContext::new(&entity, &self.name);
        let mut logic = self.logic.lock();

        let pending = self.queue_rx.len();
        let mut handled = 0;
        for _ in 0..pending {
            let Ok(request) = self.queue_rx.try_recv() else {
                break;
            };
            if !self.action_keys.iter().any(|k| k == request.key()) {
                tracing::error!(
                    extension = %self.name,
                    key = request.key(),
                    "request for an action the extension never registered"
                );
                return Err(CoreError::UnhandledAction {
                    extension: self.name.clone(),
                    key: request.key().to_owned(),
                });
            }
            logic.handle_action(&request, &ctx)?;
            handled += 1;
        }

        logic.update(&ctx)?;
        Ok(handled)
    }

    pub(crate) fn binding(&self) -> &ActionHandler {
        &self.binding
    }

    pub(crate) fn attach(&self, entity: &Entity) -> CoreResult<()> {
        let ctx = ExtensionContext::new(entity, &self.name);
        let mut logic = self.logic.lock();
        logic.on_attach(&ctx)?;
        logic.publish(&ctx)
    }

    /// The "update requested" notification, fired before the entity flushes.
    pub(crate) fn publish(&self, entity: &Entity) -> CoreResult<()> {
        let ctx = ExtensionContext::new(entity, &self.name);
        self.logic.lock().publish(&ctx)
    }

    pub(crate) fn detach_and_dispose(&self, entity: &Entity) {
        let ctx = ExtensionContext::new(entity, &self.name);
        let mut logic = self.logic.lock();
        logic.on_detach(&ctx);
        logic.dispose();
        while self.queue_rx.try_recv().is_ok() {}
    }
}

impl fmt::Debug for ExtensionHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionHost")
            .field("name", &self.name)
            .field("system", &self.system)
            .field("action_keys", &self.action_keys)
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}
