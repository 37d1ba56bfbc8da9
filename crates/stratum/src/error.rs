//! # Engine Error Types

use stratum_core::{CoreError, Severity};
use stratum_states::StateError;
use thiserror::Error;

/// Errors surfaced by the runtime.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The state machine rejected an operation.
    #[error(transparent)]
    State(#[from] StateError),

    /// An entity, scene or extension operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The configuration could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// The configuration file could not be read, or a thread could not start.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The heartbeat thread panicked.
    #[error("heartbeat thread panicked")]
    HeartbeatPanicked,
}

impl EngineError {
    /// Returns how the caller must treat this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::State(e) => e.severity(),
            Self::Core(e) => e.severity(),
            Self::Config(_) | Self::Io(_) => Severity::Recoverable,
            Self::HeartbeatPanicked => Severity::Fatal,
        }
    }

    /// Returns true for errors that must stop the heartbeat.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }
}

/// Result type for runtime operations.
pub type EngineResult<T> = Result<T, EngineError>;
