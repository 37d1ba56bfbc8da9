//! # STRATUM Core
//!
//! The per-tick data and action pipeline every active scene drives:
//! - Triple-buffered entity attributes (publish, swap, flush)
//! - Multicast action dispatch with per-extension request queues
//! - Entities, pluggable extensions and scenes
//!
//! ## Tick Protocol
//!
//! 1. Producers `publicize` into the unstable buffer (once per key per tick)
//! 2. The scene updates every entity: extensions publish, then the entity
//!    swaps and flushes
//! 3. Readers see the new values in `main`
//! 4. Each system drains its extensions' request queues and runs their update
//!
//! ## Example
//!
//! ```rust
//! use stratum_core::{Entity, Scene, Value};
//!
//! let scene = Scene::new("hangar").unwrap();
//! let ship = Entity::new("ship").unwrap();
//! scene.add_entity(ship.clone()).unwrap();
//!
//! ship.publicize("hull", 100).unwrap();
//! scene.update().unwrap();
//! assert_eq!(ship.get_attribute("hull"), Some(Value::Int(100)));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod action;
pub mod ecs;
pub mod error;
pub mod sync;
pub mod value;

pub use action::{handler, ActionDispatcher, ActionHandler, ActionRequest};
pub use ecs::{
    Entity, EntityEvent, EntityListener, Extension, ExtensionContext, ExtensionHost, ListenerId,
    Scene, SystemId,
};
pub use error::{CoreError, CoreResult, Severity};
pub use sync::PropertyStore;
pub use value::Value;
