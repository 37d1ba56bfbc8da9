//! # State Blueprints
//!
//! A TOML description of a state tree, loaded once at startup:
//!
//! ```toml
//! initial = "menu"
//!
//! [[state]]
//! path = "menu"
//! scene = "lobby"
//!
//! [[state.entity]]
//! name = "cursor"
//! attributes = { x = 0, y = 0 }
//!
//! [[state]]
//! path = "game"
//! kind = "arena"
//! initial = "play"
//!
//! [[state]]
//! path = "game/play"
//! ```
//!
//! States are created in file order, so a parent must appear before its
//! children. `kind` selects a factory in a [`StateRegistry`] and defaults to
//! [`PASSIVE_KIND`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratum_core::{Entity, Scene, Value};

use crate::error::{StateError, StateResult};
use crate::path;
use crate::registry::{StateRegistry, PASSIVE_KIND};
use crate::tree::StateTree;

/// Entity seeded into a state's scene.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityBlueprint {
    /// Entity name, unique within the scene.
    pub name: String,
    /// Attributes published and flushed before the first tick.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// One state of the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateEntry {
    /// Path from the root, leading `root` optional.
    pub path: String,
    /// Factory kind.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Initial substate name.
    #[serde(default)]
    pub initial: Option<String>,
    /// Scene name. A scene is created only if this is set.
    #[serde(default)]
    pub scene: Option<String>,
    /// Entities of the scene.
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityBlueprint>,
}

fn default_kind() -> String {
    PASSIVE_KIND.to_owned()
}

/// A whole state tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateBlueprint {
    /// State the machine is initialized into. Empty stays at the root.
    #[serde(default)]
    pub initial: String,
    /// States in creation order.
    #[serde(default, rename = "state")]
    pub states: Vec<StateEntry>,
}

impl StateBlueprint {
    /// Parses a blueprint from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Config`] on malformed TOML or unknown fields.
    pub fn from_toml_str(text: &str) -> StateResult<Self> {
        toml::from_str(text).map_err(|e| StateError::Config(e.to_string()))
    }

    /// Builds the tree, creating each state through `registry`.
    ///
    /// # Errors
    ///
    /// - [`StateError::StateNotFound`] if a parent path is not declared earlier
    /// - [`StateError::UnknownKind`] for unregistered kinds
    /// - [`StateError::InvalidName`] and [`StateError::NameInUse`] from the tree
    /// - [`StateError::Scene`] if a scene or entity cannot be created
    pub fn build(&self, registry: &StateRegistry) -> StateResult<StateTree> {
        let mut tree = StateTree::new();

        for entry in &self.states {
            let (parent_path, name) = path::split_last(path::strip_root(&entry.path));
            let parent = tree.resolve(parent_path)?;

            let mut node = registry.create(&entry.kind, name)?;
            if entry.initial.is_some() {
                node.set_initial(entry.initial.clone());
            }
            if let Some(scene_name) = &entry.scene {
                node = node.scene(Self::build_scene(scene_name, &entry.entities)?);
            } else if !entry.entities.is_empty() {
                return Err(StateError::Config(format!(
                    "state {} declares entities but no scene",
                    entry.path
                )));
            }

            tree.add_sub_state(parent, node)?;
        }

        tracing::debug!(states = self.states.len(), "blueprint built");
        Ok(tree)
    }

    fn build_scene(name: &str, entities: &[EntityBlueprint]) -> StateResult<Arc<Scene>> {
        let scene = Scene::new(name)?;
        for blueprint in entities {
            let entity = Entity::new(blueprint.name.as_str())?;
            for (key, value) in &blueprint.attributes {
                entity.publicize(key.as_str(), value.clone())?;
            }
            entity.swap_and_flush();
            scene.add_entity(entity)?;
        }
        Ok(scene)
    }
}
