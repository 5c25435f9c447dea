//! # Notification Channel
//!
//! Purpose: Provide a small in-process observer registry so application code
//! can react to lifecycle transitions without awaiting the call that caused
//! them.
//!
//! ## Design Principles
//! 1. **Observer Pattern**: `register` returns a `Token`, `unregister` takes it back.
//! 2. **Deterministic Delivery**: Handlers run synchronously, in registration order.
//! 3. **Re-entrancy**: The handler list is snapshotted before delivery, so a
//!    handler may register or unregister without deadlocking the registry.
//! 4. **Generic Payload**: The registry knows nothing about the events it carries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Opaque registration handle returned by [`Notifier::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Thread-safe observer registry for events of type `E`.
pub struct Notifier<E> {
    next_token: AtomicU64,
    handlers: Mutex<Vec<(Token, Handler<E>)>>,
}

impl<E> Notifier<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Notifier {
            next_token: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a handler and returns the token used to remove it.
    pub fn register<F>(&self, handler: F) -> Token
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((token, Arc::new(handler)));
        token
    }

    /// Removes a handler. Returns false when the token is unknown.
    pub fn unregister(&self, token: Token) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != token);
        handlers.len() != before
    }

    /// Delivers `event` to every registered handler.
    pub fn emit(&self, event: &E) {
        // Snapshot so handlers can touch the registry while running.
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_in_registration_order() {
        let notifier = Notifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        notifier.register(move |value| first.lock().push(("first", *value)));
        let second = Arc::clone(&seen);
        notifier.register(move |value| second.lock().push(("second", *value)));

        notifier.emit(&7);

        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn unregister_stops_delivery() {
        let notifier = Notifier::<&'static str>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let token = notifier.register(move |value| sink.lock().push(*value));
        notifier.emit(&"connected");

        assert!(notifier.unregister(token));
        assert!(!notifier.unregister(token));
        notifier.emit(&"disconnected");

        assert_eq!(*seen.lock(), vec!["connected"]);
        assert!(notifier.is_empty());
    }

    #[test]
    fn handler_may_register_during_emit() {
        let notifier = Arc::new(Notifier::<()>::new());
        let inner = Arc::clone(&notifier);
        notifier.register(move |_| {
            inner.register(|_| {});
        });

        notifier.emit(&());

        assert_eq!(notifier.len(), 2);
    }

    #[test]
    fn tokens_are_unique() {
        let notifier = Notifier::<()>::new();
        let a = notifier.register(|_| {});
        let b = notifier.register(|_| {});
        assert_ne!(a, b);
    }
}
