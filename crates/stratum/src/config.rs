//! # Engine Configuration
//!
//! Loaded once at startup from TOML:
//!
//! ```toml
//! initial = "menu"
//!
//! [heartbeat]
//! tick_interval_ms = 16
//!
//! [[state]]
//! path = "menu"
//! scene = "lobby"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use stratum_states::{StateBlueprint, StateEntry};

use crate::error::EngineResult;

/// Target tick interval (60 Hz).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

/// Tick duration above which a warning is logged.
pub const DEFAULT_SLOW_TICK_MS: u64 = 33;

/// Tick driver settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    /// Time between tick starts when running on a thread.
    pub tick_interval_ms: u64,
    /// Ticks slower than this are logged.
    pub slow_tick_ms: u64,
    /// Engine event channel capacity. Events beyond it are dropped.
    pub event_capacity: usize,
    /// Stop the heartbeat on the first fatal error.
    pub stop_on_fatal: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            slow_tick_ms: DEFAULT_SLOW_TICK_MS,
            event_capacity: 1024,
            stop_on_fatal: true,
        }
    }
}

/// Whole engine configuration: heartbeat settings plus the state tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Tick driver settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// State the machine is initialized into.
    #[serde(default)]
    pub initial: String,
    /// States in creation order.
    #[serde(default, rename = "state")]
    pub states: Vec<StateEntry>,
}

impl EngineConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Config`] on malformed TOML or unknown fields.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Io`] if the file cannot be read, or
    /// [`crate::EngineError::Config`] if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "loading engine config");
        Self::from_toml_str(&text)
    }

    /// The state tree description.
    #[must_use]
    pub fn blueprint(&self) -> StateBlueprint {
        StateBlueprint {
            initial: self.initial.clone(),
            states: self.states.clone(),
        }
    }
}
