// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscriber lists.

use std::sync::{Arc, Mutex, PoisonError};

/// A subscribed callback.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Thread-safe list of listeners for one event kind.
///
/// Listeners are invoked inline on the raising thread, in subscription order.
/// The list is snapshotted before invocation, so a listener may subscribe
/// further listeners without deadlocking; those only see later events.
pub struct Subscribers<T: ?Sized> {
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T: ?Sized> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Subscribers<T> {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn subscribe(&self, listener: Listener<T>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Invoke every listener with `value`.
    pub fn raise(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_raise_invokes_in_subscription_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let subscribers: Subscribers<str> = Subscribers::new();

        for tag in ["a", "b", "c"] {
            let order = order.clone();
            subscribers.subscribe(Arc::new(move |msg: &str| {
                order.lock().unwrap().push(format!("{tag}:{msg}"))
            }));
        }
        subscribers.raise("x");

        assert_eq!(*order.lock().unwrap(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn test_listener_can_subscribe_during_raise() {
        let subscribers: Arc<Subscribers<()>> = Arc::new(Subscribers::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_subscribers = subscribers.clone();
        let inner_calls = calls.clone();
        subscribers.subscribe(Arc::new(move |_: &()| {
            let calls = inner_calls.clone();
            inner_subscribers.subscribe(Arc::new(move |_: &()| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        subscribers.raise(&());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(subscribers.len(), 2);

        subscribers.raise(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty() {
        let subscribers: Subscribers<()> = Subscribers::new();
        assert!(subscribers.is_empty());
        subscribers.raise(&());
    }
}
