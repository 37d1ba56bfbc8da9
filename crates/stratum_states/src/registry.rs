//! Factory registry mapping state kinds to constructors.

use std::collections::HashMap;
use std::fmt;

use crate::error::{StateError, StateResult};
use crate::node::StateNode;

/// Kind registered by [`StateRegistry::new`], producing hook-less states.
pub const PASSIVE_KIND: &str = "passive";

/// Builds a state node from its name.
pub type StateFactory = Box<dyn Fn(&str) -> StateNode + Send + Sync>;

/// Kind name to factory.
pub struct StateRegistry {
    factories: HashMap<String, StateFactory>,
}

impl StateRegistry {
    /// Creates a registry holding only [`PASSIVE_KIND`].
    #[must_use]
    pub fn new() -> Self {
        let mut factories: HashMap<String, StateFactory> = HashMap::new();
        factories.insert(PASSIVE_KIND.to_owned(), Box::new(|name: &str| StateNode::new(name)));
        Self { factories }
    }

    /// Registers `factory` under `kind`.
    ///
    /// # Errors
    ///
    /// - [`StateError::EmptyArgument`] if `kind` is empty
    /// - [`StateError::KindInUse`] if `kind` is already registered
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> StateResult<()>
    where
        F: Fn(&str) -> StateNode + Send + Sync + 'static,
    {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(StateError::EmptyArgument("state kind"));
        }
        if self.factories.contains_key(&kind) {
            return Err(StateError::KindInUse(kind));
        }
        self.factories.insert(kind, Box::new(factory));
        Ok(())
    }

    /// Builds a node of `kind` named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownKind`] if nothing is registered under `kind`.
    pub fn create(&self, kind: &str, name: &str) -> StateResult<StateNode> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| StateError::UnknownKind(kind.to_owned()))?;
        let mut node = factory(name);
        node.name = name.to_owned();
        Ok(node)
    }

    /// Returns true if `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRegistry").field("kinds", &self.kinds()).finish()
    }
}
