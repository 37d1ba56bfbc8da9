//! # STRATUM
//!
//! The runtime crate: a heartbeat that drives a hierarchical state machine
//! whose active states own scenes of entities.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              STRATUM                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌─────────────────┐      ┌─────────────────┐     ┌──────────────┐  │
//! │  │  Heartbeat      │─────>│ stratum_states  │────>│ stratum_core │  │
//! │  │                 │      │                 │     │              │  │
//! │  │  • Tick driver  │      │  • State tree   │     │  • Scenes    │  │
//! │  │  • System loop  │      │  • NCA moves    │     │  • Entities  │  │
//! │  │  • Event bus    │      │  • Blueprints   │     │  • Buffers   │  │
//! │  └─────────────────┘      └─────────────────┘     └──────────────┘  │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: TOML engine configuration
//! - `events`: Engine event bus
//! - `heartbeat`: Tick orchestration and timing

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;

pub use stratum_core as core;
pub use stratum_states as states;

pub use config::{EngineConfig, HeartbeatConfig};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus, EventReceiver, EventSender};
pub use heartbeat::{Heartbeat, HeartbeatHandle, TickStats, TickStatsAccumulator};
