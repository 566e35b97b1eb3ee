// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Evented workload: address plus started/stopped/message subscribers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::debug;

use super::WorkloadEvents;
use super::classifier::is_readiness_line;
use super::events::Subscribers;

/// Handle of a running workload that detects readiness from its log.
pub struct EventedWorkload {
    address: RwLock<String>,
    started: Subscribers<()>,
    stopped: Subscribers<()>,
    message: Subscribers<str>,
    stop_delivered: AtomicBool,
    decorator: RwLock<Option<Weak<dyn WorkloadEvents>>>,
}

impl EventedWorkload {
    /// Handle reachable at `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: RwLock::new(address.into()),
            started: Subscribers::new(),
            stopped: Subscribers::new(),
            message: Subscribers::new(),
            stop_delivered: AtomicBool::new(false),
            decorator: RwLock::new(None),
        }
    }

    /// Replace the address.
    pub fn set_address(&self, address: impl Into<String>) {
        *self
            .address
            .write()
            .unwrap_or_else(PoisonError::into_inner) = address.into();
    }

    pub fn subscribe_started(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.started.subscribe(Arc::new(move |_: &()| listener()));
    }

    pub fn subscribe_stopped(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.stopped.subscribe(Arc::new(move |_: &()| listener()));
    }

    pub fn subscribe_message(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.message.subscribe(Arc::new(listener));
    }

    /// Route future deliveries through `decorator` while it is alive.
    pub fn decorate(&self, decorator: Weak<dyn WorkloadEvents>) {
        *self
            .decorator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(decorator);
    }

    fn outermost(&self) -> Option<Arc<dyn WorkloadEvents>> {
        self.decorator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Deliver one line from the container's log stream.
    pub fn deliver_line(&self, line: &str) {
        match self.outermost() {
            Some(decorator) => decorator.on_message(line),
            None => self.on_message(line),
        }
    }

    /// Deliver the container's disappearance. Only the first call has an effect.
    pub fn deliver_stopped(&self) {
        if self.stop_delivered.swap(true, Ordering::SeqCst) {
            debug!(address = %self.address(), "Stop already delivered");
            return;
        }
        match self.outermost() {
            Some(decorator) => decorator.raise_stopped(),
            None => self.raise_stopped(),
        }
    }

    /// Whether the stopped event has been delivered.
    pub fn is_stopped(&self) -> bool {
        self.stop_delivered.load(Ordering::SeqCst)
    }
}

impl WorkloadEvents for EventedWorkload {
    fn address(&self) -> String {
        self.address
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_message(&self, line: &str) {
        self.raise_message(line);
        if is_readiness_line(line) {
            self.raise_started();
        }
    }

    fn raise_started(&self) {
        self.started.raise(&());
    }

    fn raise_stopped(&self) {
        self.stopped.raise(&());
    }

    fn raise_message(&self, line: &str) {
        self.message.raise(line);
    }
}

impl fmt::Debug for EventedWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventedWorkload")
            .field("address", &self.address())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    const DONE: &str = r#"[18:47:45] [Server thread/INFO]: Done (6.656s)! For help, type "help""#;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_readiness_line_raises_started_once() {
        let workload = EventedWorkload::new("127.0.0.1:8001");
        let (started, listener) = counter();
        workload.subscribe_started(listener);

        workload.deliver_line("[18:47:41] [Server thread/INFO]: Preparing level \"world\"");
        workload.deliver_line("[18:47:44] [Server thread/INFO]: Time elapsed: 118 ms");
        assert_eq!(started.load(Ordering::SeqCst), 0);

        workload.deliver_line(DONE);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_every_line_is_published() {
        let workload = EventedWorkload::new("127.0.0.1:8001");
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        workload.subscribe_message(move |line| sink.lock().unwrap().push(line.to_string()));

        workload.deliver_line("first");
        workload.deliver_line(DONE);

        assert_eq!(*lines.lock().unwrap(), vec!["first".to_string(), DONE.to_string()]);
    }

    #[test]
    fn test_stopped_is_delivered_at_most_once() {
        let workload = EventedWorkload::new("127.0.0.1:8001");
        let (stopped, listener) = counter();
        workload.subscribe_stopped(listener);

        assert!(!workload.is_stopped());
        workload.deliver_stopped();
        workload.deliver_stopped();

        assert!(workload.is_stopped());
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_address() {
        let workload = EventedWorkload::new("127.0.0.1:8001");
        workload.set_address("192.168.1.50:8001");
        assert_eq!(workload.address(), "192.168.1.50:8001");
    }

    #[test]
    fn test_dropped_decorator_falls_back_to_self() {
        struct Swallow;
        impl WorkloadEvents for Swallow {
            fn address(&self) -> String {
                String::new()
            }
            fn on_message(&self, _: &str) {}
            fn raise_started(&self) {}
            fn raise_stopped(&self) {}
            fn raise_message(&self, _: &str) {}
        }

        let workload = EventedWorkload::new("127.0.0.1:8001");
        let (started, listener) = counter();
        workload.subscribe_started(listener);

        let decorator: Arc<dyn WorkloadEvents> = Arc::new(Swallow);
        workload.decorate(Arc::downgrade(&decorator));
        workload.deliver_line(DONE);
        assert_eq!(started.load(Ordering::SeqCst), 0);

        drop(decorator);
        workload.deliver_line(DONE);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}
