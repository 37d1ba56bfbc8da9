//! Immutable action requests.

use std::time::Instant;

use crate::value::Value;

/// A request for an entity to perform an action.
///
/// Immutable once constructed. Requests are shared between every handler of
/// the key, so they travel as `Arc<ActionRequest>` through extension queues.
#[derive(Clone, Debug)]
pub struct ActionRequest {
    sender: String,
    key: String,
    timestamp: Instant,
    params: Vec<Value>,
}

impl ActionRequest {
    /// Creates a request stamped with the current time.
    #[must_use]
    pub fn new(sender: impl Into<String>, key: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sender: sender.into(),
            key: key.into(),
            timestamp: Instant::now(),
            params,
        }
    }

    /// Name of whoever issued the request.
    #[inline]
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The action key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// When the request was created.
    #[inline]
    #[must_use]
    pub const fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// The parameter list.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Parameter at `index`, if present.
    #[inline]
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }
}
