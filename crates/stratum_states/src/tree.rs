//! State tree for hierarchical state management.
//!
//! Nodes live in an arena keyed by [`StateId`]. Each node links to its
//! parent by id and to its children by name, so the tree can be walked in
//! both directions without shared ownership.

use std::cmp::Ordering;
use std::collections::HashMap;

use crossbeam_channel::Sender;

use crate::error::{StateError, StateResult};
use crate::node::{Passive, StateBehavior, StateContext, StateId, StateNode, TransitionRequest};
use crate::path::{self, ROOT_NAME};

/// Arena of states rooted at [`StateId::ROOT`].
pub struct StateTree {
    /// States indexed by ID.
    nodes: HashMap<StateId, StateNode>,
    /// ID counter. Ids are never reused.
    next_id: u64,
}

impl StateTree {
    /// Creates a tree holding only a passive root.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(Box::new(Passive))
    }

    /// Creates a tree whose root runs `behavior`.
    #[must_use]
    pub fn with_root(behavior: Box<dyn StateBehavior>) -> Self {
        let mut nodes = HashMap::with_capacity(32);
        nodes.insert(StateId::ROOT, StateNode::with_behavior(ROOT_NAME, behavior));
        Self { nodes, next_id: 1 }
    }

    /// The root state.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> StateId {
        StateId::ROOT
    }

    /// Number of states, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root cannot be removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `id` names a state in this tree.
    #[must_use]
    pub fn contains(&self, id: StateId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Gets a state by ID.
    #[must_use]
    pub fn get(&self, id: StateId) -> Option<&StateNode> {
        self.nodes.get(&id)
    }

    /// Gets a state by ID, failing if it is not in the tree.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StateNotFound`] for unknown ids.
    pub fn node(&self, id: StateId) -> StateResult<&StateNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| StateError::StateNotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: StateId) -> StateResult<&mut StateNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| StateError::StateNotFound(id.to_string()))
    }

    /// Parent of a state.
    #[must_use]
    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.nodes.get(&id).and_then(StateNode::parent)
    }

    /// Adds `node` as a child of `parent`.
    ///
    /// # Errors
    ///
    /// - [`StateError::InvalidName`] if the name is empty, contains the
    ///   separator or is the root name
    /// - [`StateError::StateNotFound`] if `parent` is not in the tree
    /// - [`StateError::NameInUse`] if `parent` already has a child of that name
    pub fn add_sub_state(&mut self, parent: StateId, mut node: StateNode) -> StateResult<StateId> {
        path::validate_name(&node.name)?;
        if self.node(parent)?.children.contains_key(&node.name) {
            return Err(StateError::NameInUse {
                name: node.name,
                parent: self.absolute_path(parent)?,
            });
        }

        let id = StateId::new(self.next_id);
        self.next_id += 1;

        node.parent = Some(parent);
        node.active = false;
        node.listener = None;
        let name = node.name.clone();
        self.nodes.insert(id, node);
        self.node_mut(parent)?.children.insert(name, id);

        tracing::debug!(state = %self.absolute_path(id)?, "state added");
        Ok(id)
    }

    /// Resolves a `/`-separated path relative to `from`.
    ///
    /// An empty path resolves to `from` itself.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StateNotFound`] naming the segment that did not
    /// resolve.
    pub fn get_sub_state(&self, from: StateId, path: &str) -> StateResult<StateId> {
        let mut current = from;
        let mut rest = Some(path).filter(|p| !p.is_empty());

        while let Some(remaining) = rest {
            let (head, tail) = path::split_first(remaining);
            current = self.node(current)?.child(head).ok_or_else(|| {
                let base = self.absolute_path(current).unwrap_or_default();
                StateError::StateNotFound(path::join(&base, head))
            })?;
            rest = tail;
        }

        Ok(current)
    }

    /// Resolves a path from the root. A leading `root` segment is optional.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::StateNotFound`] if any segment is missing.
    pub fn resolve(&self, path: &str) -> StateResult<StateId> {
        self.get_sub_state(self.root(), path::strip_root(path))
    }

    /// Removes the child `name` of `parent` and disposes its subtree,
    /// children first.
    ///
    /// # Errors
    ///
    /// - [`StateError::StateNotFound`] if there is no such child
    /// - [`StateError::StateActive`] if any state in the subtree is active
    pub fn remove_sub_state(&mut self, parent: StateId, name: &str) -> StateResult<()> {
        let child = self.get_sub_state(parent, name)?;
        if self.node(child)?.parent != Some(parent) {
            return Err(StateError::StateNotFound(name.to_owned()));
        }

        if self
            .descendants(child)
            .iter()
            .any(|id| self.nodes.get(id).is_some_and(StateNode::is_active))
        {
            return Err(StateError::StateActive(self.absolute_path(child)?));
        }

        tracing::debug!(state = %self.absolute_path(child)?, "state removed");
        self.node_mut(parent)?.children.remove(name);
        self.dispose_subtree(child);
        Ok(())
    }

    /// Removes and disposes every descendant of `id`.
    ///
    /// # Errors
    ///
    /// - [`StateError::StateNotFound`] if `id` is not in the tree
    /// - [`StateError::StateActive`] if any descendant is active
    pub fn clear_children(&mut self, id: StateId) -> StateResult<()> {
        let names: Vec<String> = self.node(id)?.children.keys().cloned().collect();
        for name in names {
            self.remove_sub_state(id, &name)?;
        }
        Ok(())
    }

    /// Unlinks every descendant of `id` without running dispose hooks.
    ///
    /// The detached nodes are dropped; scenes and entities no one else holds
    /// go with them. Returns the number of nodes removed.
    ///
    /// # Errors
    ///
    /// - [`StateError::StateNotFound`] if `id` is not in the tree
    /// - [`StateError::StateActive`] if any descendant is active
    pub fn detach_children(&mut self, id: StateId) -> StateResult<usize> {
        let below: Vec<StateId> = self.descendants(id).into_iter().skip(1).collect();
        if let Some(active) = below
            .iter()
            .find(|d| self.nodes.get(*d).is_some_and(StateNode::is_active))
        {
            return Err(StateError::StateActive(self.absolute_path(*active)?));
        }

        self.node_mut(id)?.children.clear();
        for d in &below {
            self.nodes.remove(d);
        }
        tracing::debug!(state = %self.absolute_path(id)?, removed = below.len(), "children detached");
        Ok(below.len())
    }

    fn dispose_subtree(&mut self, id: StateId) {
        let Some(mut node) = self.nodes.remove(&id) else {
            return;
        };
        for &child in node.children.values() {
            self.dispose_subtree(child);
        }
        node.behavior.dispose();
        if let Some(scene) = node.scene.take() {
            scene.clear_entities();
        }
    }

    /// `id` and everything below it, depth-first, children in name order.
    #[must_use]
    pub fn descendants(&self, id: StateId) -> Vec<StateId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(&next) else {
                continue;
            };
            out.push(next);
            stack.extend(node.children.values().rev().copied());
        }
        out
    }

    /// Path from the root, e.g. `root/menu/play`.
    ///
    /// # Errors
    ///
    /// - [`StateError::StateNotFound`] if `id` is not in the tree
    /// - [`StateError::BrokenParentChain`] if an ancestor is missing
    pub fn absolute_path(&self, id: StateId) -> StateResult<String> {
        let names: Vec<&str> = self
            .chain(id)?
            .into_iter()
            .map(|s| self.nodes[&s].name.as_str())
            .collect();
        let separator = path::SEPARATOR.to_string();
        Ok(names.join(separator.as_str()))
    }

    /// Number of edges between `id` and the root.
    ///
    /// # Errors
    ///
    /// Same as [`StateTree::absolute_path`].
    pub fn depth(&self, id: StateId) -> StateResult<usize> {
        Ok(self.chain(id)?.len() - 1)
    }

    /// Ids from the root down to `id`, inclusive.
    ///
    /// # Errors
    ///
    /// Same as [`StateTree::absolute_path`].
    pub fn chain(&self, id: StateId) -> StateResult<Vec<StateId>> {
        let mut chain = vec![id];
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            current = self
                .nodes
                .get(&parent)
                .ok_or_else(|| StateError::BrokenParentChain(current.name.clone()))?;
            chain.push(parent);
        }
        if chain.last() != Some(&self.root()) {
            return Err(StateError::BrokenParentChain(current.name.clone()));
        }
        chain.reverse();
        Ok(chain)
    }

    /// Returns true if `ancestor` is `id` or lies on its parent chain.
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: StateId, id: StateId) -> bool {
        let mut current = Some(id);
        while let Some(s) = current {
            if s == ancestor {
                return true;
            }
            current = self.parent(s);
        }
        false
    }

    /// Deepest state that is an ancestor of both `a` and `b` (either may be
    /// its own ancestor).
    ///
    /// The deeper side climbs one level at a time; at equal depth both climb.
    ///
    /// # Errors
    ///
    /// - [`StateError::StateNotFound`] if either id is not in the tree
    /// - [`StateError::BrokenParentChain`] if a non-root state has no parent
    pub fn nearest_common_ancestor(&self, a: StateId, b: StateId) -> StateResult<StateId> {
        let (mut a, mut b) = (a, b);
        let (mut depth_a, mut depth_b) = (self.depth(a)?, self.depth(b)?);

        while a != b {
            match depth_a.cmp(&depth_b) {
                Ordering::Greater => {
                    a = self.parent_of(a)?;
                    depth_a -= 1;
                }
                Ordering::Less => {
                    b = self.parent_of(b)?;
                    depth_b -= 1;
                }
                Ordering::Equal => {
                    a = self.parent_of(a)?;
                    b = self.parent_of(b)?;
                    depth_a -= 1;
                    depth_b -= 1;
                }
            }
        }
        Ok(a)
    }

    pub(crate) fn parent_of(&self, id: StateId) -> StateResult<StateId> {
        let node = self.node(id)?;
        node.parent
            .ok_or_else(|| StateError::BrokenParentChain(node.name.clone()))
    }

    /// Runs the build-up hook, enters the scene and marks the state active.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is not in the tree.
    pub fn enter(&mut self, id: StateId) -> StateResult<()> {
        let path = self.absolute_path(id)?;
        let node = self.node_mut(id)?;
        node.active = true;
        let ctx = StateContext::new(&path, node.scene.as_ref(), node.listener.as_ref());
        node.behavior.build_up(&ctx);
        if let Some(scene) = &node.scene {
            scene.enter();
        }
        tracing::debug!(state = %path, "state entered");
        Ok(())
    }

    /// Runs the tear-down hook, exits the scene and clears the active mark.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is not in the tree.
    pub fn exit(&mut self, id: StateId) -> StateResult<()> {
        let path = self.absolute_path(id)?;
        let node = self.node_mut(id)?;
        let ctx = StateContext::new(&path, node.scene.as_ref(), node.listener.as_ref());
        node.behavior.tear_down(&ctx);
        if let Some(scene) = &node.scene {
            scene.exit();
        }
        node.active = false;
        tracing::debug!(state = %path, "state exited");
        Ok(())
    }

    /// Updates every state from the root down to `id`: the behavior hook,
    /// then the scene flush.
    ///
    /// # Errors
    ///
    /// The first hook or scene error; states below it are not updated.
    pub fn update(&mut self, id: StateId) -> StateResult<()> {
        for state in self.chain(id)? {
            let path = self.absolute_path(state)?;
            let node = self.node_mut(state)?;
            let ctx = StateContext::new(&path, node.scene.as_ref(), node.listener.as_ref());
            node.behavior.update(&ctx)?;
            if let Some(scene) = &node.scene {
                scene.update()?;
            }
        }
        Ok(())
    }

    pub(crate) fn set_listener(
        &mut self,
        id: StateId,
        listener: Option<Sender<TransitionRequest>>,
    ) -> StateResult<()> {
        self.node_mut(id)?.listener = listener;
        Ok(())
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<String> = self
            .descendants(self.root())
            .into_iter()
            .filter_map(|id| self.absolute_path(id).ok())
            .collect();
        f.debug_struct("StateTree").field("states", &paths).finish()
    }
}
