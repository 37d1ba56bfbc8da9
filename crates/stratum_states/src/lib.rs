//! # STRATUM States
//!
//! A hierarchical state machine over a tree of named states.
//!
//! - Exactly one leaf is active; its whole ancestor chain is active with it
//! - Transitions exit up to the nearest common ancestor, then enter down
//! - Each state may own a [`stratum_core::Scene`], entered and ticked with it
//! - States ask for transitions through a channel; requests are applied after
//!   the tick that raised them
//!
//! ## Example
//!
//! ```rust
//! use stratum_states::{StateMachine, StateNode, StateTree};
//!
//! let mut tree = StateTree::new();
//! let menu = tree.add_sub_state(tree.root(), StateNode::new("menu")).unwrap();
//! tree.add_sub_state(menu, StateNode::new("play")).unwrap();
//!
//! let machine = StateMachine::new(tree);
//! machine.initialize("menu").unwrap();
//! machine.transit_to_state("menu/play").unwrap();
//! assert_eq!(machine.active_path(), "root/menu/play");
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod blueprint;
pub mod error;
pub mod machine;
pub mod node;
pub mod path;
pub mod registry;
pub mod tree;

pub use blueprint::{EntityBlueprint, StateBlueprint, StateEntry};
pub use error::{StateError, StateResult};
pub use machine::{MachineEvent, StateMachine, TransitionHandle};
pub use node::{Passive, StateBehavior, StateContext, StateId, StateNode, TransitionRequest};
pub use registry::{StateFactory, StateRegistry, PASSIVE_KIND};
pub use tree::StateTree;
