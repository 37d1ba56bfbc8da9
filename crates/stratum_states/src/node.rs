//! # State Nodes
//!
//! A node is one state in the tree: a name, a parent link, named children,
//! an optional initial substate, an optional scene, and the behavior hooks
//! the machine invokes on enter, exit, tick and disposal.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use stratum_core::Scene;

use crate::error::StateResult;

/// Unique state identifier within one tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u64);

impl StateId {
    /// The root state of every tree.
    pub const ROOT: Self = Self(0);

    /// Creates an id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request, raised by a state, to move the machine elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionRequest {
    /// Absolute path of the requesting state, or an external tag.
    pub from: String,
    /// Target path.
    pub to: String,
}

/// View of a state handed to its hooks.
pub struct StateContext<'a> {
    path: &'a str,
    scene: Option<&'a Arc<Scene>>,
    listener: Option<&'a Sender<TransitionRequest>>,
}

impl<'a> StateContext<'a> {
    pub(crate) const fn new(
        path: &'a str,
        scene: Option<&'a Arc<Scene>>,
        listener: Option<&'a Sender<TransitionRequest>>,
    ) -> Self {
        Self { path, scene, listener }
    }

    /// Absolute path of the state.
    #[must_use]
    pub const fn path(&self) -> &str {
        self.path
    }

    /// The state's scene, if it has one.
    #[must_use]
    pub const fn scene(&self) -> Option<&'a Arc<Scene>> {
        self.scene
    }

    /// Asks the machine to transition to `target` after the current tick.
    ///
    /// Only the active leaf is heard; for any other state this returns false
    /// and the request is dropped.
    pub fn request_transition(&self, target: impl Into<String>) -> bool {
        let Some(listener) = self.listener else {
            tracing::debug!(state = self.path, "transition request dropped: state is not the active leaf");
            return false;
        };
        listener
            .send(TransitionRequest {
                from: self.path.to_owned(),
                to: target.into(),
            })
            .is_ok()
    }
}

/// Hooks a state runs as the machine moves through the tree.
///
/// Hooks run under the machine's transition lock. They may publish to
/// entities and request transitions through the context, but must not call
/// the machine directly.
pub trait StateBehavior: Send {
    /// Called when the state becomes part of the active chain.
    fn build_up(&mut self, _ctx: &StateContext<'_>) {}

    /// Called when the state leaves the active chain.
    fn tear_down(&mut self, _ctx: &StateContext<'_>) {}

    /// Called once per tick while the state is in the active chain.
    ///
    /// # Errors
    ///
    /// Any error aborts the remainder of the tick's state updates.
    fn update(&mut self, _ctx: &StateContext<'_>) -> StateResult<()> {
        Ok(())
    }

    /// Called once when the state is removed from the tree.
    fn dispose(&mut self) {}
}

/// Behavior with no hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passive;

impl StateBehavior for Passive {}

/// One state in the tree.
pub struct StateNode {
    pub(crate) name: String,
    pub(crate) parent: Option<StateId>,
    pub(crate) children: BTreeMap<String, StateId>,
    pub(crate) initial: Option<String>,
    pub(crate) scene: Option<Arc<Scene>>,
    pub(crate) active: bool,
    pub(crate) behavior: Box<dyn StateBehavior>,
    pub(crate) listener: Option<Sender<TransitionRequest>>,
}

impl StateNode {
    /// Creates a detached node with no hooks.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_behavior(name, Box::new(Passive))
    }

    /// Creates a detached node running `behavior`.
    #[must_use]
    pub fn with_behavior(name: impl Into<String>, behavior: Box<dyn StateBehavior>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: BTreeMap::new(),
            initial: None,
            scene: None,
            active: false,
            behavior,
            listener: None,
        }
    }

    /// Sets the substate entered automatically after this one.
    #[must_use]
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.set_initial(Some(name.into()));
        self
    }

    /// Attaches a scene, entered and exited with this state.
    #[must_use]
    pub fn scene(mut self, scene: Arc<Scene>) -> Self {
        self.scene = Some(scene);
        self
    }

    /// Replaces the initial substate name. Empty names clear it.
    pub fn set_initial(&mut self, name: Option<String>) {
        self.initial = name.filter(|n| !n.is_empty());
    }

    /// State name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent state, `None` for the root and detached nodes.
    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Option<StateId> {
        self.parent
    }

    /// Initial substate name.
    #[must_use]
    pub fn initial_name(&self) -> Option<&str> {
        self.initial.as_deref()
    }

    /// The state's scene.
    #[must_use]
    pub const fn scene_ref(&self) -> Option<&Arc<Scene>> {
        self.scene.as_ref()
    }

    /// Returns true while the state is in the active chain.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Returns true while the state receives transition requests.
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Child id by name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<StateId> {
        self.children.get(name).copied()
    }

    /// Child names, sorted.
    pub fn child_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.children.keys().map(String::as_str)
    }

    /// Number of children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("initial", &self.initial)
            .field("scene", &self.scene.as_ref().map(|s| s.name()))
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
