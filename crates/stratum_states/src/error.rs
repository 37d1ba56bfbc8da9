//! # State Machine Error Types

use stratum_core::{CoreError, Severity};
use thiserror::Error;

/// Errors that can occur in the state tree and machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A required argument was empty.
    #[error("required argument `{0}` is empty")]
    EmptyArgument(&'static str),

    /// A state name is empty, contains the separator or is the reserved root name.
    #[error("invalid state name: {0:?}")]
    InvalidName(String),

    /// A sibling already uses that name.
    #[error("state name already in use: {name} (under {parent})")]
    NameInUse {
        /// The rejected name.
        name: String,
        /// Path of the parent state.
        parent: String,
    },

    /// A path segment did not resolve.
    #[error("state not found: {0}")]
    StateNotFound(String),

    /// The state, or one of its descendants, is currently active.
    #[error("state is active and cannot be removed: {0}")]
    StateActive(String),

    /// A non-root state has no parent. The tree is corrupt.
    #[error("broken parent chain at state {0}")]
    BrokenParentChain(String),

    /// The machine has not been initialized or was shut down.
    #[error("state machine is not running")]
    NotRunning,

    /// The machine was initialized twice.
    #[error("state machine is already running")]
    AlreadyRunning,

    /// No factory is registered under that kind.
    #[error("unknown state kind: {0}")]
    UnknownKind(String),

    /// A factory is already registered under that kind.
    #[error("state kind already registered: {0}")]
    KindInUse(String),

    /// A blueprint could not be parsed or applied.
    #[error("invalid blueprint: {0}")]
    Config(String),

    /// A scene, entity or extension operation failed.
    #[error(transparent)]
    Scene(#[from] CoreError),
}

impl StateError {
    /// Returns how the caller must treat this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::EmptyArgument(_) | Self::InvalidName(_) => Severity::Precondition,
            Self::NameInUse { .. }
            | Self::StateNotFound(_)
            | Self::StateActive(_)
            | Self::NotRunning
            | Self::AlreadyRunning
            | Self::UnknownKind(_)
            | Self::KindInUse(_)
            | Self::Config(_) => Severity::Recoverable,
            Self::BrokenParentChain(_) => Severity::Fatal,
            Self::Scene(e) => e.severity(),
        }
    }

    /// Returns true for errors that must never be recovered from.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
