// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle observer.
//!
//! One observer per provisioned container. It polls the runtime for the
//! container's id and, once the container is no longer listed as live, raises
//! the stopped event on the bound workload and exits. Disappearance is the
//! only way out of the loop: an intentional stop, a crash and an external
//! `docker rm` all look the same. A failed listing is not a disappearance.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::runtime::{ContainerFilter, ContainerRuntime};
use crate::workload::EventedWorkload;

/// Default interval between liveness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Watches one container until it is gone.
pub struct LifecycleObserver {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    workload: Arc<EventedWorkload>,
    poll_interval: Duration,
}

impl LifecycleObserver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        container_id: impl Into<String>,
        workload: Arc<EventedWorkload>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
            workload,
            poll_interval,
        }
    }

    /// Run the observer on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll until the container disappears, then deliver the stop.
    pub async fn run(self) {
        info!(container_id = %self.container_id, "Listening for container until it stops");

        let filter = ContainerFilter::Id(self.container_id.clone());
        loop {
            match self.runtime.list_containers(&filter).await {
                Ok(live) if live.is_empty() => break,
                Ok(_) => debug!(container_id = %self.container_id, "Container still running"),
                Err(e) => warn!(
                    container_id = %self.container_id,
                    error = %e,
                    "Failed to query container state"
                ),
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        info!(container_id = %self.container_id, "Container stopped");
        self.workload.deliver_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_stop_raised_once_after_removal() {
        let runtime = Arc::new(MockRuntime::new());
        let id = runtime.add_external_container("mc-server-test", &[8001, 8002]).await;

        let workload = Arc::new(EventedWorkload::new("127.0.0.1:8001"));
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = stops.clone();
        workload.subscribe_stopped(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let handle = LifecycleObserver::new(
            runtime.clone(),
            id.clone(),
            workload.clone(),
            DEFAULT_POLL_INTERVAL,
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());

        runtime.remove_externally(&id).await;
        handle.await.unwrap();

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(workload.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_container_stops_immediately() {
        let runtime = Arc::new(MockRuntime::new());
        let workload = Arc::new(EventedWorkload::new("127.0.0.1:8001"));

        LifecycleObserver::new(runtime, "gone", workload.clone(), DEFAULT_POLL_INTERVAL)
            .run()
            .await;

        assert!(workload.is_stopped());
    }
}
