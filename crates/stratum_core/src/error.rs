//! # Core Error Types
//!
//! All errors that can occur in the attribute/action pipeline.

use thiserror::Error;

/// How a failure must be treated by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// A required argument was empty. The caller has a bug.
    Precondition,
    /// Duplicate or unknown name. The caller is expected to handle and log it.
    Recoverable,
    /// Protocol violation by a collaborator. Never retried or repaired.
    Fatal,
}

/// Errors that can occur in the core pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A required argument was empty.
    #[error("required argument `{0}` is empty")]
    EmptyArgument(&'static str),

    /// An extension with the same name is already attached.
    #[error("extension name already in use: {0}")]
    DuplicateExtension(String),

    /// No extension with that name is attached.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// An entity with the same name already lives in the scene.
    #[error("entity name already in use: {0}")]
    DuplicateEntity(String),

    /// No entity with that name lives in the scene.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// A key was published twice between two flushes.
    #[error("buffer publication: key `{key}` was already published this tick")]
    DuplicatePublication {
        /// The attribute key.
        key: String,
    },

    /// An extension received a request for an action it never registered.
    #[error("extension `{extension}` received unregistered action `{key}`")]
    UnhandledAction {
        /// The receiving extension.
        extension: String,
        /// The action key.
        key: String,
    },

    /// The extension's owning entity is gone.
    #[error("extension `{0}` is not attached to a live entity")]
    Detached(String),

    /// The entity was disposed and accepts no new extensions.
    #[error("entity disposed: {0}")]
    EntityDisposed(String),
}

impl CoreError {
    /// Returns how the caller must treat this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::EmptyArgument(_) => Severity::Precondition,
            Self::DuplicateExtension(_)
            | Self::ExtensionNotFound(_)
            | Self::DuplicateEntity(_)
            | Self::EntityNotFound(_)
            | Self::Detached(_)
            | Self::EntityDisposed(_) => Severity::Recoverable,
            Self::DuplicatePublication { .. } | Self::UnhandledAction { .. } => Severity::Fatal,
        }
    }

    /// Returns true for protocol violations.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Fails with [`CoreError::EmptyArgument`] when `value` is empty.
pub(crate) fn require(value: &str, argument: &'static str) -> CoreResult<()> {
    if value.is_empty() {
        return Err(CoreError::EmptyArgument(argument));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_classification() {
        assert_eq!(CoreError::EmptyArgument("key").severity(), Severity::Precondition);
        assert_eq!(
            CoreError::ExtensionNotFound("physics".into()).severity(),
            Severity::Recoverable
        );
        assert!(CoreError::DuplicatePublication { key: "hp".into() }.is_fatal());
        assert!(!CoreError::DuplicateEntity("ship".into()).is_fatal());
        assert_eq!(CoreError::EntityDisposed("ship".into()).severity(), Severity::Recoverable);
    }

    #[test]
    fn test_require() {
        assert!(require("x", "name").is_ok());
        assert_eq!(require("", "name"), Err(CoreError::EmptyArgument("name")));
    }
}
