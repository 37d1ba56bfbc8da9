//! # Entities, Extensions and Scenes
//!
//! ## Ownership
//!
//! ```text
//! Scene ──owns──> Entity ──owns──> PropertyStore
//!                    │  ──owns──> ActionDispatcher
//!                    │  ──owns──> ExtensionHost ──owns──> Box<dyn Extension>
//!                    │                  │
//!                    └<──── weak ───────┘
//! ```
//!
//! Back references never extend a lifetime.

mod entity;
mod extension;
mod scene;

pub use entity::{Entity, EntityEvent, EntityListener, ListenerId};
pub use extension::{Extension, ExtensionContext, ExtensionHost, SystemId};
pub use scene::Scene;
