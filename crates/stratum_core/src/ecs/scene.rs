//! # Scene
//!
//! A scene owns a set of entities and keeps count of the external systems
//! their extensions reference. The count is fed by the entities' extension
//! notifications, so attaching an extension anywhere in the scene is enough
//! for the scheduler to learn that its system is required.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::entity::{Entity, EntityEvent, ListenerId};
use super::extension::{ExtensionHost, SystemId};
use crate::error::{require, CoreError, CoreResult};

/// Reference counts of required systems.
///
/// Counts are derived from the set of attached (entity, extension) pairs, so a
/// pair reported twice (snapshot plus event) is only counted once.
#[derive(Debug, Default)]
struct SystemRefs {
    counts: HashMap<SystemId, usize>,
    attached: HashSet<(String, String)>,
}

impl SystemRefs {
    fn attach(&mut self, entity: &str, extension: &str, system: &SystemId) {
        if self.attached.insert((entity.to_owned(), extension.to_owned())) {
            *self.counts.entry(system.clone()).or_insert(0) += 1;
        }
    }

    fn detach(&mut self, entity: &str, extension: &str, system: &SystemId) {
        if self.attached.remove(&(entity.to_owned(), extension.to_owned())) {
            if let Some(count) = self.counts.get_mut(system) {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(system);
                }
            }
        }
    }
}

struct SceneEntry {
    entity: Arc<Entity>,
    listener: ListenerId,
}

/// A named set of entities driven together each tick.
pub struct Scene {
    name: String,
    entities: RwLock<BTreeMap<String, SceneEntry>>,
    systems: Arc<Mutex<SystemRefs>>,
    entered: AtomicBool,
}

impl Scene {
    /// Creates an empty scene.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyArgument`] if `name` is empty.
    pub fn new(name: impl Into<String>) -> CoreResult<Arc<Self>> {
        let name = name.into();
        require(&name, "scene name")?;
        Ok(Arc::new(Self {
            name,
            entities: RwLock::new(BTreeMap::new()),
            systems: Arc::new(Mutex::new(SystemRefs::default())),
            entered: AtomicBool::new(false),
        }))
    }

    /// Scene name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an entity and starts tracking its extensions.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateEntity`] if the name is taken.
    pub fn add_entity(&self, entity: Arc<Entity>) -> CoreResult<()> {
        let mut entities = self.entities.write();
        if entities.contains_key(entity.name()) {
            return Err(CoreError::DuplicateEntity(entity.name().to_owned()));
        }

        let refs = Arc::downgrade(&self.systems);
        let (listener, attached) = entity.subscribe_with_snapshot(Arc::new(move |event: &EntityEvent| {
            Self::on_entity_event(&refs, event);
        }));

        {
            let mut systems = self.systems.lock();
            for (extension, system) in &attached {
                systems.attach(entity.name(), extension, system);
            }
        }

        entity.set_owner(Some(self.name.clone()));
        tracing::debug!(scene = %self.name, entity = entity.name(), "entity added");
        entities.insert(entity.name().to_owned(), SceneEntry { entity, listener });
        Ok(())
    }

    /// Removes an entity and returns it. The entity is not disposed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityNotFound`] if no entity has that name.
    pub fn remove_entity(&self, name: &str) -> CoreResult<Arc<Entity>> {
        let entry = self
            .entities
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::EntityNotFound(name.to_owned()))?;

        Ok(self.release(entry))
    }

    /// Looks up an entity.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<Arc<Entity>> {
        self.entities.read().get(name).map(|e| Arc::clone(&e.entity))
    }

    /// All entities, ordered by name.
    #[must_use]
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities
            .read()
            .values()
            .map(|e| Arc::clone(&e.entity))
            .collect()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if the scene holds no entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Systems referenced by at least one attached extension, sorted.
    #[must_use]
    pub fn required_systems(&self) -> Vec<SystemId> {
        let mut systems: Vec<_> = self.systems.lock().counts.keys().cloned().collect();
        systems.sort();
        systems
    }

    /// Number of attached extensions referencing `system`.
    #[must_use]
    pub fn system_refcount(&self, system: &SystemId) -> usize {
        self.systems.lock().counts.get(system).copied().unwrap_or(0)
    }

    /// Extensions of every entity that reference `system`.
    #[must_use]
    pub fn extensions_for(&self, system: &SystemId) -> Vec<Arc<ExtensionHost>> {
        self.entities()
            .iter()
            .flat_map(|e| e.extensions())
            .filter(|h| h.system() == system)
            .collect()
    }

    /// Flushes every entity.
    ///
    /// All entities are flushed even when one fails; the first error is
    /// returned at the end.
    ///
    /// # Errors
    ///
    /// The first error an entity update returned.
    pub fn update(&self) -> CoreResult<()> {
        let mut first_error = None;
        for entity in self.entities() {
            if let Err(e) = entity.update() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Marks the scene as entered. Called by the owning state.
    pub fn enter(&self) {
        self.entered.store(true, Ordering::Release);
        tracing::debug!(scene = %self.name, entities = self.len(), "scene entered");
    }

    /// Marks the scene as exited. Called by the owning state.
    pub fn exit(&self) {
        self.entered.store(false, Ordering::Release);
        tracing::debug!(scene = %self.name, "scene exited");
    }

    /// Returns true between [`Scene::enter`] and [`Scene::exit`].
    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }

    /// Removes and disposes every entity.
    pub fn clear_entities(&self) {
        let entries = std::mem::take(&mut *self.entities.write());
        for entry in entries.into_values() {
            self.release(entry).dispose();
        }
    }

    fn release(&self, entry: SceneEntry) -> Arc<Entity> {
        let SceneEntry { entity, listener } = entry;
        entity.unsubscribe(listener);
        {
            let mut systems = self.systems.lock();
            for host in entity.extensions() {
                systems.detach(entity.name(), host.name(), host.system());
            }
        }
        entity.set_owner(None);
        tracing::debug!(scene = %self.name, entity = entity.name(), "entity removed");
        entity
    }

    fn on_entity_event(refs: &Weak<Mutex<SystemRefs>>, event: &EntityEvent) {
        let Some(refs) = refs.upgrade() else {
            return;
        };
        let mut systems = refs.lock();
        match event {
            EntityEvent::ExtensionAdded { entity, extension, system } => {
                systems.attach(entity, extension, system);
            }
            EntityEvent::ExtensionRemoved { entity, extension, system } => {
                systems.detach(entity, extension, system);
            }
        }
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("entities", &self.entities.read().keys().collect::<Vec<_>>())
            .field("required_systems", &self.required_systems())
            .field("entered", &self.is_entered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::extension::{Extension, ExtensionContext};

    struct Probe {
        name: &'static str,
        system: &'static str,
    }

    impl Extension for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn system(&self) -> SystemId {
            SystemId::new(self.system)
        }

        fn publish(&mut self, ctx: &ExtensionContext<'_>) -> CoreResult<()> {
            ctx.publicize(self.name, true)
        }
    }

    fn probe(name: &'static str, system: &'static str) -> Box<Probe> {
        Box::new(Probe { name, system })
    }

    #[test]
    fn test_refcount_follows_attach_and_detach() {
        let scene = Scene::new("hangar").unwrap();
        let ship = Entity::new("ship").unwrap();
        scene.add_entity(Arc::clone(&ship)).unwrap();

        let physics = SystemId::new("physics");
        ship.add_extension(probe("body", "physics")).unwrap();
        ship.add_extension(probe("collider", "physics")).unwrap();
        ship.add_extension(probe("sensor", "ai")).unwrap();

        assert_eq!(scene.system_refcount(&physics), 2);
        assert_eq!(scene.required_systems(), vec![SystemId::new("ai"), physics.clone()]);

        ship.remove_extension("body").unwrap();
        assert_eq!(scene.system_refcount(&physics), 1);

        ship.remove_extension("collider").unwrap();
        assert_eq!(scene.system_refcount(&physics), 0);
        assert_eq!(scene.required_systems(), vec![SystemId::new("ai")]);
    }

    #[test]
    fn test_preattached_extensions_are_counted() {
        let scene = Scene::new("hangar").unwrap();
        let ship = Entity::new("ship").unwrap();
        ship.add_extension(probe("body", "physics")).unwrap();

        scene.add_entity(Arc::clone(&ship)).unwrap();
        assert_eq!(scene.system_refcount(&SystemId::new("physics")), 1);
        assert_eq!(ship.owner().as_deref(), Some("hangar"));

        let removed = scene.remove_entity("ship").unwrap();
        assert!(scene.required_systems().is_empty());
        assert!(removed.owner().is_none());

        // Detached from the scene: no longer counted.
        ship.add_extension(probe("sensor", "ai")).unwrap();
        assert!(scene.required_systems().is_empty());
    }

    #[test]
    fn test_duplicate_and_missing_entities() {
        let scene = Scene::new("hangar").unwrap();
        scene.add_entity(Entity::new("ship").unwrap()).unwrap();

        assert_eq!(
            scene.add_entity(Entity::new("ship").unwrap()),
            Err(CoreError::DuplicateEntity("ship".into()))
        );
        assert!(matches!(
            scene.remove_entity("ghost"),
            Err(CoreError::EntityNotFound(_))
        ));
    }

    #[test]
    fn test_update_flushes_every_entity() {
        let scene = Scene::new("hangar").unwrap();
        for name in ["a", "b"] {
            let entity = Entity::new(name).unwrap();
            scene.add_entity(Arc::clone(&entity)).unwrap();
            entity.publicize("ready", true).unwrap();
        }

        scene.update().unwrap();
        for entity in scene.entities() {
            assert_eq!(entity.get_attribute("ready"), Some(crate::Value::Bool(true)));
        }
    }

    #[test]
    fn test_clear_entities_disposes() {
        let scene = Scene::new("hangar").unwrap();
        let ship = Entity::new("ship").unwrap();
        ship.add_extension(probe("body", "physics")).unwrap();
        scene.add_entity(Arc::clone(&ship)).unwrap();

        scene.clear_entities();
        assert!(scene.is_empty());
        assert!(ship.is_disposed());
        assert!(scene.required_systems().is_empty());
    }

    #[test]
    fn test_extensions_for_system() {
        let scene = Scene::new("hangar").unwrap();
        let ship = Entity::new("ship").unwrap();
        ship.add_extension(probe("body", "physics")).unwrap();
        ship.add_extension(probe("sensor", "ai")).unwrap();
        scene.add_entity(ship).unwrap();

        let hosts = scene.extensions_for(&SystemId::new("physics"));
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name(), "body");
    }
}
