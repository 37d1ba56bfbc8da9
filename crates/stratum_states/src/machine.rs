//! # State Machine
//!
//! Drives a [`StateTree`]: keeps one active leaf, moves between leaves along
//! the nearest common ancestor, ticks the active chain, and applies the
//! transition requests states raise while ticking.
//!
//! ## Transition Order
//!
//! ```text
//!            root
//!           /    \
//!       menu      game          menu/options -> game/play
//!        |       /    \
//!     options  play  pause      exit:  options, menu
//!                               enter: game, play
//! ```
//!
//! Exits run from the old leaf up to (not including) the common ancestor,
//! enters run from below the ancestor down to the target. If the target
//! declares an initial substate, the machine keeps descending.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use stratum_core::{Scene, SystemId};

use crate::error::{StateError, StateResult};
use crate::node::{StateId, StateNode, TransitionRequest};
use crate::tree::StateTree;

/// Tag used as the source of requests made through a [`TransitionHandle`].
pub const EXTERNAL_SOURCE: &str = "external";

/// Notification of machine activity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineEvent {
    /// A state joined the active chain.
    Entered {
        /// Absolute path of the state.
        path: String,
    },
    /// A state left the active chain.
    Exited {
        /// Absolute path of the state.
        path: String,
    },
    /// The active leaf changed.
    Transitioned {
        /// Previous leaf.
        from: String,
        /// New leaf.
        to: String,
    },
}

/// Cloneable handle for requesting transitions from outside the tree.
///
/// Requests are applied by [`StateMachine::process_transition_requests`],
/// which [`StateMachine::update`] calls after ticking the states.
#[derive(Clone, Debug)]
pub struct TransitionHandle {
    sender: Sender<TransitionRequest>,
}

impl TransitionHandle {
    /// Queues a transition to `target`. Returns false if the machine is gone.
    pub fn request(&self, target: impl Into<String>) -> bool {
        self.sender
            .send(TransitionRequest {
                from: EXTERNAL_SOURCE.to_owned(),
                to: target.into(),
            })
            .is_ok()
    }
}

struct MachineState {
    tree: StateTree,
    active: StateId,
}

/// Hierarchical state machine.
///
/// All transitions, ticks and tree edits are serialized by one lock; a
/// transition never interleaves with another or with a tick.
pub struct StateMachine {
    state: Mutex<MachineState>,
    running: AtomicBool,
    request_tx: Sender<TransitionRequest>,
    request_rx: Receiver<TransitionRequest>,
    subscribers: Mutex<Vec<Sender<MachineEvent>>>,
}

impl StateMachine {
    /// Creates a stopped machine over `tree`.
    #[must_use]
    pub fn new(tree: StateTree) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let active = tree.root();
        Self {
            state: Mutex::new(MachineState { tree, active }),
            running: AtomicBool::new(false),
            request_tx,
            request_rx,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Enters the root, then transitions to `initial` unless it is empty.
    ///
    /// Returns the active leaf.
    ///
    /// # Errors
    ///
    /// - [`StateError::AlreadyRunning`] if the machine was already initialized
    /// - Any error of [`StateMachine::transit_to_state`]; the machine stays
    ///   running at the root in that case
    pub fn initialize(&self, initial: &str) -> StateResult<StateId> {
        let mut state = self.state.lock();
        if self.running.load(Ordering::Acquire) {
            return Err(StateError::AlreadyRunning);
        }

        let root = state.tree.root();
        state.tree.enter(root)?;
        state.tree.set_listener(root, Some(self.request_tx.clone()))?;
        state.active = root;
        self.running.store(true, Ordering::Release);
        self.emit(MachineEvent::Entered {
            path: state.tree.absolute_path(root)?,
        });
        tracing::info!(initial, "state machine initialized");

        if initial.is_empty() {
            return Ok(root);
        }
        self.transit_locked(&mut state, initial)
    }

    /// Moves the active leaf to `path`, then into any initial substates.
    ///
    /// Returns the new active leaf. Transitioning to the current leaf is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - [`StateError::EmptyArgument`] if `path` is empty
    /// - [`StateError::NotRunning`] before [`StateMachine::initialize`]
    /// - [`StateError::StateNotFound`] if `path` does not resolve
    /// - [`StateError::BrokenParentChain`] if the tree is corrupt
    pub fn transit_to_state(&self, path: &str) -> StateResult<StateId> {
        if path.is_empty() {
            return Err(StateError::EmptyArgument("state path"));
        }
        let mut state = self.state.lock();
        if !self.is_running() {
            return Err(StateError::NotRunning);
        }
        self.transit_locked(&mut state, path)
    }

    fn transit_locked(&self, state: &mut MachineState, path: &str) -> StateResult<StateId> {
        let mut target = state.tree.resolve(path)?;
        loop {
            if !self.transit_step(state, target)? {
                return Ok(target);
            }
            let Some(initial) = state.tree.node(target)?.initial_name().map(str::to_owned) else {
                return Ok(target);
            };
            target = state.tree.get_sub_state(target, &initial)?;
        }
    }

    /// One leaf-to-leaf move, without following initial substates.
    fn transit_step(&self, state: &mut MachineState, target: StateId) -> StateResult<bool> {
        let current = state.active;
        if target == current {
            return Ok(false);
        }

        let nca = state.tree.nearest_common_ancestor(current, target)?;
        let from = state.tree.absolute_path(current)?;
        let to = state.tree.absolute_path(target)?;

        let mut node = current;
        while node != nca {
            let path = state.tree.absolute_path(node)?;
            state.tree.exit(node)?;
            self.emit(MachineEvent::Exited { path });
            node = state.tree.parent_of(node)?;
        }

        let mut entering = Vec::new();
        let mut node = target;
        while node != nca {
            entering.push(node);
            node = state.tree.parent_of(node)?;
        }
        for node in entering.into_iter().rev() {
            state.tree.enter(node)?;
            self.emit(MachineEvent::Entered {
                path: state.tree.absolute_path(node)?,
            });
        }

        state.tree.set_listener(current, None)?;
        state.tree.set_listener(target, Some(self.request_tx.clone()))?;
        state.active = target;

        tracing::info!(%from, %to, "state transition");
        self.emit(MachineEvent::Transitioned { from, to });
        Ok(true)
    }

    /// Ticks the active chain from the root down, then applies queued
    /// transition requests.
    ///
    /// # Errors
    ///
    /// - [`StateError::NotRunning`] before [`StateMachine::initialize`]
    /// - The first state or scene error; queued requests stay queued
    /// - A fatal error raised while applying a request
    pub fn update(&self) -> StateResult<usize> {
        {
            let mut state = self.state.lock();
            if !self.is_running() {
                return Err(StateError::NotRunning);
            }
            let active = state.active;
            state.tree.update(active)?;
        }
        self.process_transition_requests()
    }

    /// Applies the transition requests queued so far, in arrival order.
    ///
    /// Rejected requests are logged and skipped. Returns how many were
    /// applied.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned; they stop processing.
    pub fn process_transition_requests(&self) -> StateResult<usize> {
        let pending = self.request_rx.len();
        let mut applied = 0;
        for request in self.request_rx.try_iter().take(pending) {
            match self.transit_to_state(&request.to) {
                Ok(_) => applied += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(from = %request.from, to = %request.to, error = %e, "transition request rejected");
                }
            }
        }
        Ok(applied)
    }

    /// Transitions to the root, exits it and stops the machine.
    ///
    /// The active chain is exited leaf to root, the root last. Every state
    /// below the root is then removed, leaving a bare root. With
    /// `auto_dispose` the removed states are disposed, children first;
    /// without it their dispose hooks never run. Queued transition requests
    /// are dropped. Shutting down a stopped machine is a no-op.
    ///
    /// # Errors
    ///
    /// Any error raised while exiting or disposing.
    pub fn shutdown(&self, auto_dispose: bool) -> StateResult<()> {
        let mut state = self.state.lock();
        if !self.is_running() {
            return Ok(());
        }

        let root = state.tree.root();
        self.transit_step(&mut state, root)?;
        let path = state.tree.absolute_path(root)?;
        state.tree.exit(root)?;
        state.tree.set_listener(root, None)?;
        self.running.store(false, Ordering::Release);
        self.emit(MachineEvent::Exited { path });

        let dropped = self.request_rx.try_iter().count();
        if auto_dispose {
            state.tree.clear_children(root)?;
        } else {
            state.tree.detach_children(root)?;
        }
        tracing::info!(auto_dispose, dropped, "state machine shut down");
        Ok(())
    }

    /// Returns true between [`StateMachine::initialize`] and
    /// [`StateMachine::shutdown`].
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current active leaf.
    #[must_use]
    pub fn active_state(&self) -> StateId {
        self.state.lock().active
    }

    /// Absolute path of the active leaf.
    #[must_use]
    pub fn active_path(&self) -> String {
        let state = self.state.lock();
        state.tree.absolute_path(state.active).unwrap_or_default()
    }

    /// Scenes of the active chain, root first. Empty while stopped.
    #[must_use]
    pub fn active_scenes(&self) -> Vec<Arc<Scene>> {
        let state = self.state.lock();
        if !self.is_running() {
            return Vec::new();
        }
        state
            .tree
            .chain(state.active)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| state.tree.get(id).and_then(StateNode::scene_ref).cloned())
            .collect()
    }

    /// Systems required by the active scenes, sorted and deduplicated.
    #[must_use]
    pub fn required_systems(&self) -> Vec<SystemId> {
        let systems: BTreeSet<SystemId> = self
            .active_scenes()
            .iter()
            .flat_map(|scene| scene.required_systems())
            .collect();
        systems.into_iter().collect()
    }

    /// Handle for requesting transitions from other threads.
    #[must_use]
    pub fn transition_handle(&self) -> TransitionHandle {
        TransitionHandle {
            sender: self.request_tx.clone(),
        }
    }

    /// Number of transition requests waiting to be applied.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.request_rx.len()
    }

    /// Subscribes to machine events. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<MachineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: MachineEvent) {
        self.subscribers.lock().retain(|s| s.send(event.clone()).is_ok());
    }

    /// Runs `f` with read access to the tree, under the transition lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&StateTree) -> R) -> R {
        f(&self.state.lock().tree)
    }

    /// Adds `node` below the state at `parent_path`.
    ///
    /// # Errors
    ///
    /// Same as [`StateTree::add_sub_state`], plus
    /// [`StateError::StateNotFound`] if `parent_path` does not resolve.
    pub fn add_sub_state(&self, parent_path: &str, node: StateNode) -> StateResult<StateId> {
        let mut state = self.state.lock();
        let parent = state.tree.resolve(parent_path)?;
        state.tree.add_sub_state(parent, node)
    }

    /// Removes the child `name` of the state at `parent_path`.
    ///
    /// # Errors
    ///
    /// Same as [`StateTree::remove_sub_state`].
    pub fn remove_sub_state(&self, parent_path: &str, name: &str) -> StateResult<()> {
        let mut state = self.state.lock();
        let parent = state.tree.resolve(parent_path)?;
        state.tree.remove_sub_state(parent, name)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(StateTree::new())
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("running", &self.is_running())
            .field("active", &self.active_path())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}
