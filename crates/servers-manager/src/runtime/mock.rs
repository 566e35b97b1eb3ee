// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runtime for testing.
//!
//! An in-memory container runtime that simulates creation, port publishing,
//! log streaming and removal without talking to a container engine.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

/// Mock container state.
#[derive(Clone)]
struct MockContainer {
    name: String,
    spec: Option<ContainerSpec>,
    ports: Vec<u16>,
    running: bool,
    sink: Option<LogSink>,
}

/// Mock runtime for testing.
pub struct MockRuntime {
    containers: Arc<Mutex<HashMap<String, MockContainer>>>,
    next_id: AtomicU64,
    /// Delay inside `create_container`, widening the window between port
    /// selection and the container becoming visible.
    pub create_delay: Duration,
    fail_next_create: AtomicBool,
    fail_next_start: AtomicBool,
    fail_log_attach: AtomicBool,
    replay: StdMutex<Vec<LogFrame>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    /// Create a new, empty mock runtime.
    pub fn new() -> Self {
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            create_delay: Duration::ZERO,
            fail_next_create: AtomicBool::new(false),
            fail_next_start: AtomicBool::new(false),
            fail_log_attach: AtomicBool::new(false),
            replay: StdMutex::new(Vec::new()),
        }
    }

    /// Create a mock runtime whose `create_container` sleeps for `delay`.
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::new()
        }
    }

    /// Make the next `create_container` call fail (as if the image pull failed).
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Make the next `start_container` call fail.
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Make every `attach_logs` call fail.
    pub fn fail_log_attach(&self) {
        self.fail_log_attach.store(true, Ordering::SeqCst);
    }

    /// Queue a stdout line (newline appended) that the next `attach_logs`
    /// delivers before it returns, like output written before the attach.
    pub fn replay_on_attach(&self, line: &str) {
        self.replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogFrame::stdout(format!("{line}\n")));
    }

    fn allocate_id(&self) -> String {
        format!("mock{:08x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a running container that this process did not create.
    pub async fn add_external_container(&self, name: &str, ports: &[u16]) -> String {
        let id = self.allocate_id();
        self.containers.lock().await.insert(
            id.clone(),
            MockContainer {
                name: name.to_string(),
                spec: None,
                ports: ports.to_vec(),
                running: true,
                sink: None,
            },
        );
        id
    }

    /// Remove a container behind everyone's back (crash, `docker rm` by an operator).
    pub async fn remove_externally(&self, id: &str) -> bool {
        self.containers.lock().await.remove(id).is_some()
    }

    /// Push a raw frame to the container's attached log sink.
    ///
    /// Returns false when nothing is attached.
    pub async fn emit_frame(&self, id: &str, frame: LogFrame) -> bool {
        let sink = {
            let containers = self.containers.lock().await;
            containers.get(id).and_then(|c| c.sink.clone())
        };
        match sink {
            Some(sink) => {
                sink(frame);
                true
            }
            None => false,
        }
    }

    /// Push one stdout line (newline appended) to the container's log sink.
    pub async fn emit_line(&self, id: &str, line: &str) -> bool {
        self.emit_frame(id, LogFrame::stdout(format!("{line}\n")))
            .await
    }

    /// Ids of containers currently running.
    pub async fn live_ids(&self) -> Vec<String> {
        let containers = self.containers.lock().await;
        let mut ids: Vec<String> = containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The spec a container was created from.
    pub async fn spec_of(&self, id: &str) -> Option<ContainerSpec> {
        self.containers
            .lock()
            .await
            .get(id)
            .and_then(|c| c.spec.clone())
    }

    /// Number of containers known to the runtime, running or not.
    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }

        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "create".to_string(),
                stderr: format!("Unable to find image '{}'", spec.image),
            });
        }

        let mut containers = self.containers.lock().await;
        if containers.values().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Conflict(spec.name.clone()));
        }

        let mut ports: Vec<u16> = spec.ports.iter().map(|p| p.host_port).collect();
        ports.sort_unstable();
        ports.dedup();

        let id = self.allocate_id();
        containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                spec: Some(spec.clone()),
                ports,
                running: false,
                sink: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "start".to_string(),
                stderr: "driver failed programming external connectivity".to_string(),
            });
        }
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.containers
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>> {
        let containers = self.containers.lock().await;
        Ok(containers
            .iter()
            .filter(|(_, c)| c.running || filter.includes_exited())
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                names: vec![c.name.clone()],
                published_ports: c.ports.clone(),
            })
            .filter(|s| filter.matches(s))
            .collect())
    }

    async fn attach_logs(&self, id: &str, sink: LogSink) -> Result<()> {
        if self.fail_log_attach.load(Ordering::SeqCst) {
            return Err(RuntimeError::CommandFailed {
                command: "logs".to_string(),
                stderr: "attach refused".to_string(),
            });
        }
        {
            let mut containers = self.containers.lock().await;
            let container = containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            container.sink = Some(sink.clone());
        }

        let backlog = std::mem::take(
            &mut *self
                .replay
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for frame in backlog {
            sink(frame);
        }
        Ok(())
    }
}
