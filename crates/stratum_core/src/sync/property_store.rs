//! # Triple-Buffered Property Store
//!
//! ## Architecture
//!
//! ```text
//!                    ┌───────────────────────────────┐
//!                    │         PropertyStore         │
//!                    │                               │
//!   publicize() ───> │  ┌──────────┐   ┌──────────┐  │
//!                    │  │ unstable │<─>│  stable  │  │
//!                    │  └──────────┘   └────┬─────┘  │
//!                    │                      │ merge  │
//!                    │                 ┌────▼─────┐  │
//!   get_attribute() <│─────────────────│   main   │  │
//!                    │                 └──────────┘  │
//!                    └───────────────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - `publicize`: any thread, contends only on the unstable lock
//! - `get_attribute`: any thread, shared read lock on main
//! - `swap_and_flush`: once per tick, after all producers published

use std::collections::HashMap;
use std::mem;

use parking_lot::{Mutex, RwLock};

use crate::error::{require, CoreError, CoreResult};
use crate::value::Value;

type Buffer = HashMap<String, Value>;

/// Per-entity attribute storage with tick-bounded publication.
///
/// ## Usage
///
/// ```rust
/// use stratum_core::{PropertyStore, Value};
///
/// let store = PropertyStore::new();
/// store.publicize("hull", Value::Int(100)).unwrap();
/// assert!(store.get_attribute("hull").is_none()); // not flushed yet
///
/// store.swap_and_flush();
/// assert_eq!(store.get_attribute("hull"), Some(Value::Int(100)));
/// ```
#[derive(Debug, Default)]
pub struct PropertyStore {
    /// Durable state. Only ever gains data through a flush.
    main: RwLock<Buffer>,
    /// Snapshot committed by the last swap, waiting to be merged.
    stable: Mutex<Buffer>,
    /// Write buffer for the current tick.
    unstable: Mutex<Buffer>,
}

impl PropertyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a value for the current tick.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EmptyArgument`] if `key` is empty.
    /// - [`CoreError::DuplicatePublication`] if `key` was already published since
    ///   the last flush. Two producers writing the same key in one tick is a bug.
    pub fn publicize(&self, key: impl Into<String>, value: impl Into<Value>) -> CoreResult<()> {
        let key = key.into();
        require(&key, "key")?;

        let mut unstable = self.unstable.lock();
        if unstable.contains_key(&key) {
            tracing::error!(key = %key, "duplicate publication within one tick");
            return Err(CoreError::DuplicatePublication { key });
        }
        unstable.insert(key, value.into());
        Ok(())
    }

    /// Commits everything published this tick into main.
    ///
    /// 1. Swap stable and unstable (pointer exchange) and clear the new unstable
    /// 2. Merge stable into main, overwriting existing keys
    ///
    /// Returns the number of keys merged.
    pub fn swap_and_flush(&self) -> usize {
        let mut stable = self.stable.lock();
        {
            let mut unstable = self.unstable.lock();
            mem::swap(&mut *unstable, &mut *stable);
            unstable.clear();
        }

        let merged = stable.len();
        if merged > 0 {
            let mut main = self.main.write();
            main.extend(stable.drain());
        }
        merged
    }

    /// Reads a flushed attribute. Unknown keys are `None`, never an error.
    #[must_use]
    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        self.main.read().get(key).cloned()
    }

    /// Returns true if `key` has been flushed into main.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.main.read().contains_key(key)
    }

    /// Number of flushed attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.main.read().len()
    }

    /// Returns true if nothing has been flushed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.main.read().is_empty()
    }

    /// Number of keys published since the last flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.unstable.lock().len()
    }

    /// Copies the flushed state.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.main.read().clone()
    }

    /// Drops every buffer's content.
    pub fn clear(&self) {
        self.unstable.lock().clear();
        self.stable.lock().clear();
        self.main.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_is_invisible_until_flush() {
        let store = PropertyStore::new();
        store.publicize("speed", 3).unwrap();

        assert_eq!(store.get_attribute("speed"), None);
        assert_eq!(store.pending_len(), 1);

        assert_eq!(store.swap_and_flush(), 1);
        assert_eq!(store.get_attribute("speed"), Some(Value::Int(3)));
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_duplicate_publication_rejected() {
        let store = PropertyStore::new();
        store.publicize("speed", 1).unwrap();

        let err = store.publicize("speed", 2).unwrap_err();
        assert_eq!(err, CoreError::DuplicatePublication { key: "speed".into() });

        store.swap_and_flush();
        assert_eq!(store.get_attribute("speed"), Some(Value::Int(1)));
    }

    #[test]
    fn test_key_can_be_republished_after_flush() {
        let store = PropertyStore::new();
        store.publicize("speed", 1).unwrap();
        store.swap_and_flush();

        store.publicize("speed", 2).unwrap();
        store.swap_and_flush();
        assert_eq!(store.get_attribute("speed"), Some(Value::Int(2)));
    }

    #[test]
    fn test_merge_keeps_untouched_keys() {
        let store = PropertyStore::new();
        store.publicize("a", 1).unwrap();
        store.publicize("b", 2).unwrap();
        store.swap_and_flush();

        store.publicize("b", 20).unwrap();
        store.swap_and_flush();

        assert_eq!(store.get_attribute("a"), Some(Value::Int(1)));
        assert_eq!(store.get_attribute("b"), Some(Value::Int(20)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = PropertyStore::new();
        assert_eq!(store.publicize("", 1), Err(CoreError::EmptyArgument("key")));
    }

    #[test]
    fn test_flush_without_publications() {
        let store = PropertyStore::new();
        assert_eq!(store.swap_and_flush(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_holds_flushed_state_only() {
        let store = PropertyStore::new();
        store.publicize("hp", 10).unwrap();
        store.swap_and_flush();
        store.publicize("mp", 5).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("hp"), Some(&Value::Int(10)));

        store.swap_and_flush();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn test_clear() {
        let store = PropertyStore::new();
        store.publicize("a", 1).unwrap();
        store.swap_and_flush();
        store.publicize("b", 2).unwrap();

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.pending_len(), 0);
    }
}
