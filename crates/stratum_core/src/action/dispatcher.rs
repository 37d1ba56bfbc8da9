//! # Multicast Action Dispatch
//!
//! Every action key maps to an ordered list of handlers. A request invokes
//! the whole list in registration order, synchronously, on the caller's thread.
//!
//! The table lock is only held to snapshot the list; handlers run after it is
//! released, so a handler may register, unregister or request again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::request::ActionRequest;
use crate::error::{require, CoreResult};
use crate::value::Value;

/// A handler bound to an action key.
///
/// Identity is the allocation: two clones of the same `Arc` are the same
/// handler, two separately created closures never are.
pub type ActionHandler = Arc<dyn Fn(&Arc<ActionRequest>) + Send + Sync>;

/// Wraps a closure into an [`ActionHandler`].
pub fn handler<F>(f: F) -> ActionHandler
where
    F: Fn(&Arc<ActionRequest>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered handler lists keyed by action.
#[derive(Default)]
pub struct ActionDispatcher {
    handlers: RwLock<HashMap<String, Vec<ActionHandler>>>,
}

impl ActionDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list for `key`.
    ///
    /// Not deduplicated: registering the same handler N times makes every
    /// request invoke it N times.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::EmptyArgument`] if `key` is empty.
    pub fn register_action_handler(&self, key: &str, handler: ActionHandler) -> CoreResult<()> {
        require(key, "key")?;
        self.handlers
            .write()
            .entry(key.to_owned())
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Removes `handler` from the list for `key`.
    ///
    /// With `remove_all` every occurrence goes, otherwise only the most recently
    /// registered one. Returns how many entries were removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::EmptyArgument`] if `key` is empty.
    pub fn unregister_action_handler(
        &self,
        key: &str,
        handler: &ActionHandler,
        remove_all: bool,
    ) -> CoreResult<usize> {
        require(key, "key")?;
        let mut table = self.handlers.write();
        let Some(list) = table.get_mut(key) else {
            return Ok(0);
        };

        let removed = if remove_all {
            let before = list.len();
            list.retain(|h| !Arc::ptr_eq(h, handler));
            before - list.len()
        } else if let Some(pos) = list.iter().rposition(|h| Arc::ptr_eq(h, handler)) {
            list.remove(pos);
            1
        } else {
            0
        };

        if list.is_empty() {
            table.remove(key);
        }
        Ok(removed)
    }

    /// Invokes every handler registered for `key`.
    ///
    /// A key with no handlers is silently dropped. Returns the number of
    /// handler invocations.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::EmptyArgument`] if `sender` or `key` is empty.
    pub fn request_action(&self, sender: &str, key: &str, params: Vec<Value>) -> CoreResult<usize> {
        require(sender, "sender")?;
        require(key, "key")?;

        let snapshot = match self.handlers.read().get(key) {
            Some(list) => list.clone(),
            None => {
                tracing::trace!(key, sender, "action request dropped, no handler");
                return Ok(0);
            }
        };

        let request = Arc::new(ActionRequest::new(sender, key, params));
        for h in &snapshot {
            h(&request);
        }
        Ok(snapshot.len())
    }

    /// Number of handlers registered for `key`.
    #[must_use]
    pub fn handler_count(&self, key: &str) -> usize {
        self.handlers.read().get(key).map_or(0, Vec::len)
    }

    /// Returns true if any handler is registered for `key`.
    #[must_use]
    pub fn has_handlers(&self, key: &str) -> bool {
        self.handlers.read().contains_key(key)
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.handlers.read();
        let mut map = f.debug_map();
        for (key, list) in table.iter() {
            map.entry(key, &list.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (ActionHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let h = handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (h, count)
    }

    #[test]
    fn test_repeated_registration_multiplies_invocations() {
        let dispatcher = ActionDispatcher::new();
        let (h, count) = counting();

        for _ in 0..3 {
            dispatcher.register_action_handler("fire", Arc::clone(&h)).unwrap();
        }

        assert_eq!(dispatcher.request_action("pilot", "fire", vec![]).unwrap(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unknown_key_is_dropped() {
        let dispatcher = ActionDispatcher::new();
        assert_eq!(dispatcher.request_action("pilot", "warp", vec![]).unwrap(), 0);
    }

    #[test]
    fn test_unregister_last_occurrence() {
        let dispatcher = ActionDispatcher::new();
        let (a, count_a) = counting();
        let (b, count_b) = counting();

        dispatcher.register_action_handler("fire", Arc::clone(&a)).unwrap();
        dispatcher.register_action_handler("fire", Arc::clone(&b)).unwrap();
        dispatcher.register_action_handler("fire", Arc::clone(&a)).unwrap();

        assert_eq!(dispatcher.unregister_action_handler("fire", &a, false).unwrap(), 1);
        assert_eq!(dispatcher.handler_count("fire"), 2);

        dispatcher.request_action("pilot", "fire", vec![]).unwrap();
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_all_occurrences() {
        let dispatcher = ActionDispatcher::new();
        let (a, _) = counting();
        let (b, _) = counting();

        dispatcher.register_action_handler("fire", Arc::clone(&a)).unwrap();
        dispatcher.register_action_handler("fire", Arc::clone(&b)).unwrap();
        dispatcher.register_action_handler("fire", Arc::clone(&a)).unwrap();

        assert_eq!(dispatcher.unregister_action_handler("fire", &a, true).unwrap(), 2);
        assert_eq!(dispatcher.handler_count("fire"), 1);

        assert_eq!(dispatcher.unregister_action_handler("fire", &b, true).unwrap(), 1);
        assert!(!dispatcher.has_handlers("fire"));
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let dispatcher = ActionDispatcher::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher
                .register_action_handler("log", handler(move |_| order.lock().push(tag)))
                .unwrap();
        }

        dispatcher.request_action("test", "log", vec![]).unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_handler_sees_request_fields() {
        let dispatcher = ActionDispatcher::new();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let s = Arc::clone(&seen);

        dispatcher
            .register_action_handler(
                "thrust",
                handler(move |req| {
                    *s.lock() = Some((req.sender().to_owned(), req.param(0).cloned()));
                }),
            )
            .unwrap();

        dispatcher.request_action("pilot", "thrust", vec![Value::Float(0.5)]).unwrap();
        assert_eq!(
            *seen.lock(),
            Some(("pilot".to_owned(), Some(Value::Float(0.5))))
        );
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let dispatcher = ActionDispatcher::new();
        let (h, _) = counting();
        assert!(dispatcher.register_action_handler("", h).is_err());
        assert!(dispatcher.request_action("", "fire", vec![]).is_err());
    }
}
