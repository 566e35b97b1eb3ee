// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failure-aware workload: an evented workload that also reports exceptions.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::WorkloadEvents;
use super::classifier::{LogClassifier, LogEvent};
use super::evented::EventedWorkload;
use super::events::Subscribers;

/// Decorates an [`EventedWorkload`] with exception-span detection.
///
/// Holds its own subscriber lists, independent of the inner handle's. Every
/// started/stopped/message event is raised on the inner handle first and on
/// this wrapper second; exception events only exist on the wrapper. The
/// address is shared with the inner handle.
pub struct FailureAwareWorkload {
    inner: Arc<EventedWorkload>,
    started: Subscribers<()>,
    stopped: Subscribers<()>,
    message: Subscribers<str>,
    exception: Subscribers<str>,
    classifier: Mutex<LogClassifier>,
}

impl FailureAwareWorkload {
    /// Wrap `inner` and make it route its log and stop deliveries here.
    pub fn wrap(inner: Arc<EventedWorkload>) -> Arc<Self> {
        let wrapper = Arc::new(Self {
            inner,
            started: Subscribers::new(),
            stopped: Subscribers::new(),
            message: Subscribers::new(),
            exception: Subscribers::new(),
            classifier: Mutex::new(LogClassifier::new()),
        });
        let decorator: Arc<dyn WorkloadEvents> = wrapper.clone();
        wrapper.inner.decorate(Arc::downgrade(&decorator));
        wrapper
    }

    /// The wrapped handle.
    pub fn inner(&self) -> &Arc<EventedWorkload> {
        &self.inner
    }

    pub fn set_address(&self, address: impl Into<String>) {
        self.inner.set_address(address);
    }

    /// Whether the container has been observed gone.
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
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

    /// Subscribe to captured exception spans.
    pub fn subscribe_exception(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.exception.subscribe(Arc::new(listener));
    }

    /// Notify exception subscribers with one captured span.
    pub fn raise_exception(&self, payload: &str) {
        warn!(
            address = %self.address(),
            lines = payload.lines().count(),
            "Exception captured from server log"
        );
        self.exception.raise(payload);
    }
}

impl WorkloadEvents for FailureAwareWorkload {
    fn address(&self) -> String {
        self.inner.address()
    }

    fn on_message(&self, line: &str) {
        self.raise_message(line);

        let event = self
            .classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .feed(line);
        match event {
            Some(LogEvent::Started) => {
                debug!(address = %self.address(), "Server reported ready");
                self.raise_started();
            }
            Some(LogEvent::Exception(payload)) => self.raise_exception(&payload),
            None => {}
        }
    }

    fn raise_started(&self) {
        self.inner.raise_started();
        self.started.raise(&());
    }

    fn raise_stopped(&self) {
        self.inner.raise_stopped();
        self.stopped.raise(&());
    }

    fn raise_message(&self, line: &str) {
        self.inner.raise_message(line);
        self.message.raise(line);
    }
}

impl fmt::Debug for FailureAwareWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureAwareWorkload")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DONE: &str = r#"[18:47:45] [Server thread/INFO]: Done (6.656s)! For help, type "help""#;

    fn wrapped() -> Arc<FailureAwareWorkload> {
        FailureAwareWorkload::wrap(Arc::new(EventedWorkload::new("127.0.0.1:8001")))
    }

    fn record(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl Fn() + Send + Sync + 'static {
        move || log.lock().unwrap().push(tag.to_string())
    }

    #[test]
    fn test_message_reaches_inner_then_wrapper() {
        let workload = wrapped();
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_log = log.clone();
        workload
            .inner()
            .subscribe_message(move |line| inner_log.lock().unwrap().push(format!("inner:{line}")));
        let outer_log = log.clone();
        workload.subscribe_message(move |line| outer_log.lock().unwrap().push(format!("outer:{line}")));

        workload.on_message("hello");

        assert_eq!(*log.lock().unwrap(), vec!["inner:hello", "outer:hello"]);
    }

    #[test]
    fn test_log_stream_delivery_is_classified_by_wrapper() {
        let workload = wrapped();
        let log = Arc::new(Mutex::new(Vec::new()));
        workload.inner().subscribe_started(record(log.clone(), "inner"));
        workload.subscribe_started(record(log.clone(), "outer"));

        // lines arrive through the inner handle, as the provisioner wires them
        workload.inner().deliver_line(DONE);

        assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
    }

    #[test]
    fn test_stopped_reaches_both_once() {
        let workload = wrapped();
        let log = Arc::new(Mutex::new(Vec::new()));
        workload.inner().subscribe_stopped(record(log.clone(), "inner"));
        workload.subscribe_stopped(record(log.clone(), "outer"));

        workload.inner().deliver_stopped();
        workload.inner().deliver_stopped();

        assert!(workload.is_stopped());
        assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
    }

    #[test]
    fn test_exception_span() {
        let workload = wrapped();
        let exceptions = Arc::new(Mutex::new(Vec::new()));
        let sink = exceptions.clone();
        workload.subscribe_exception(move |payload| sink.lock().unwrap().push(payload.to_string()));

        for line in [
            "[08:48:36] [Server thread/ERROR]: Error occurred while enabling MineIt-MineableGems v1.1 (Is it up to date?)",
            "java.lang.IllegalStateException: zip file closed",
            "\tat java.util.zip.ZipFile.ensureOpen(ZipFile.java:840) ~[?:?]",
            "\tat java.util.zip.ZipFile.getEntry(ZipFile.java:339) ~[?:?]",
            "[08:48:36] [Server thread/INFO]: [MineIt-MineableGems] Disabling MineIt-MineableGems v1.1",
        ] {
            workload.inner().deliver_line(line);
        }

        assert_eq!(
            *exceptions.lock().unwrap(),
            vec![
                "java.lang.IllegalStateException: zip file closed\n\
                 \tat java.util.zip.ZipFile.ensureOpen(ZipFile.java:840) ~[?:?]\n\
                 \tat java.util.zip.ZipFile.getEntry(ZipFile.java:339) ~[?:?]"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_exception_only_on_wrapper_and_info_log_raises_none() {
        let workload = wrapped();
        let exceptions = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let exception_count = exceptions.clone();
        workload.subscribe_exception(move |_| {
            exception_count.fetch_add(1, Ordering::SeqCst);
        });
        let started_count = started.clone();
        workload.subscribe_started(move || {
            started_count.fetch_add(1, Ordering::SeqCst);
        });

        for line in [
            "[18:47:32] [ServerMain/INFO]: Building unoptimized datafixer",
            "[18:47:41] [Server thread/INFO]: Preparing level \"world\"",
            "[18:47:44] [Server thread/INFO]: Time elapsed: 118 ms",
            DONE,
        ] {
            workload.on_message(line);
        }

        assert_eq!(exceptions.load(Ordering::SeqCst), 0);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_address_is_shared_with_inner() {
        let workload = wrapped();
        workload.set_address("8.8.4.4:8001");
        assert_eq!(workload.inner().address(), "8.8.4.4:8001");
        assert_eq!(workload.address(), "8.8.4.4:8001");
    }
}
