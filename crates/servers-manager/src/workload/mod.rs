// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload handles.
//!
//! A handle represents one running server and its event subscriptions. The
//! provisioner creates an [`EventedWorkload`]; the orchestrator wraps it in a
//! [`FailureAwareWorkload`] that additionally reports exception spans.
//!
//! The log stream and the lifecycle observer always deliver into the inner
//! handle. Once wrapped, the inner handle routes those deliveries to its
//! decorator, so classification happens in the outermost layer and every
//! raised event fires on the inner subscribers first, then on the wrapper's.

pub mod classifier;
mod evented;
mod events;
mod failure_aware;

pub use classifier::{LogClassifier, LogEvent};
pub use evented::EventedWorkload;
pub use events::{Listener, Subscribers};
pub use failure_aware::FailureAwareWorkload;

/// Event surface shared by every handle layer.
pub trait WorkloadEvents: Send + Sync {
    /// Current `host:port` address.
    fn address(&self) -> String;

    /// Ingest one log line: publish it and classify it.
    fn on_message(&self, line: &str);

    /// Notify started subscribers.
    fn raise_started(&self);

    /// Notify stopped subscribers.
    fn raise_stopped(&self);

    /// Notify message subscribers.
    fn raise_message(&self, line: &str);
}
