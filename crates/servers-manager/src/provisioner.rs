// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload provisioner.
//!
//! Turns a prepared folder into a running container:
//!
//! 1. Pick a free port pair, create the container with the folder mounted at
//!    `/server`, start it.
//! 2. Hand a new [`EventedWorkload`] to the caller's decorator, attach the
//!    log stream to it and spawn a [`LifecycleObserver`] for the container.
//!
//! Both steps run under the allocation lock. It must cover the port query
//! *and* the start, because a created container only shows up in the
//! published port list once it is running.
//!
//! [`Provisioner::close`] takes the same lock, refuses further starts, kills
//! and removes every container this instance created (selected by its
//! provisioning id in the container name), then waits for every observer to
//! exit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DEFAULT_CONTAINER_HOST, DEFAULT_IMAGE_TEMPLATE};
use crate::error::{Error, Result};
use crate::folder::{COMPANION_PORT, GAME_PORT};
use crate::observer::{DEFAULT_POLL_INTERVAL, LifecycleObserver};
use crate::ports::{DEFAULT_BASE_PORT, PortAllocator, PortPair};
use crate::runtime::{
    BindMount, ContainerFilter, ContainerRuntime, ContainerSpec, LogFrame, LogSink, LogStream,
    PortBinding,
};
use crate::workload::EventedWorkload;

/// Mount point of the workload folder inside the container.
pub const CONTAINER_WORKDIR: &str = "/server";

/// Prefix of every container name created by a provisioner.
pub const CONTAINER_NAME_PREFIX: &str = "mc-server-";

/// Process-wide lock serializing port selection and container start.
///
/// Clones share the same lock. Provisioners that may run against the same
/// runtime should be built from one `AllocationLock`.
#[derive(Debug, Clone, Default)]
pub struct AllocationLock(Arc<tokio::sync::Mutex<()>>);

impl AllocationLock {
    pub fn new() -> Self {
        Self::default()
    }

    async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// First port of the first pair.
    pub base_port: u16,
    /// Interval between container liveness checks.
    pub poll_interval: Duration,
    /// Image template; `{version}` is replaced by the runtime version.
    pub image_template: String,
    /// Host part of the address handed to a new workload.
    pub container_host: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            image_template: DEFAULT_IMAGE_TEMPLATE.to_string(),
            container_host: DEFAULT_CONTAINER_HOST.to_string(),
        }
    }
}

impl From<&Config> for ProvisionerConfig {
    fn from(config: &Config) -> Self {
        Self {
            base_port: config.base_port,
            poll_interval: config.poll_interval,
            image_template: config.image_template.clone(),
            container_host: config.container_host.clone(),
        }
    }
}

/// A container started by this provisioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned id.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Host ports bound to the game and control ports.
    pub ports: PortPair,
    /// Bind-mounted workload folder.
    pub folder: PathBuf,
}

/// Creates, starts and tears down workload containers.
pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    allocator: PortAllocator,
    lock: AllocationLock,
    config: ProvisionerConfig,
    provisioning_id: String,
    live: Arc<Mutex<HashMap<PathBuf, ContainerHandle>>>,
    observers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Provisioner {
    /// Provisioner with its own allocation lock.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ProvisionerConfig) -> Self {
        Self::with_lock(runtime, config, AllocationLock::new())
    }

    /// Provisioner sharing `lock` with other provisioners.
    pub fn with_lock(
        runtime: Arc<dyn ContainerRuntime>,
        config: ProvisionerConfig,
        lock: AllocationLock,
    ) -> Self {
        let provisioning_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        info!(
            provisioning_id = %provisioning_id,
            runtime = runtime.runtime_type(),
            base_port = config.base_port,
            "Provisioner created"
        );
        Self {
            runtime,
            allocator: PortAllocator::new(config.base_port),
            lock,
            config,
            provisioning_id,
            live: Arc::new(Mutex::new(HashMap::new())),
            observers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Random id embedded in the names of containers created here.
    pub fn provisioning_id(&self) -> &str {
        &self.provisioning_id
    }

    /// Name prefix shared by every container created here.
    pub fn name_prefix(&self) -> String {
        format!("{CONTAINER_NAME_PREFIX}{}-", self.provisioning_id)
    }

    /// Containers started here that have not been observed stopping.
    pub fn live_containers(&self) -> Vec<ContainerHandle> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Image for a runtime version.
    pub fn image_for(&self, runtime_version: u32) -> String {
        self.config
            .image_template
            .replace("{version}", &runtime_version.to_string())
    }

    fn container_name(&self, folder: &Path) -> String {
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sanitized: String = folder_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{}{sanitized}", self.name_prefix())
    }

    fn container_spec(
        &self,
        name: String,
        folder: &Path,
        entrypoint: &str,
        runtime_version: u32,
        ports: PortPair,
    ) -> ContainerSpec {
        ContainerSpec {
            name,
            image: self.image_for(runtime_version),
            ports: vec![
                PortBinding::tcp(ports.game, GAME_PORT),
                PortBinding::udp(ports.game, GAME_PORT),
                PortBinding::tcp(ports.control, COMPANION_PORT),
            ],
            mounts: vec![BindMount {
                host_path: folder.to_path_buf(),
                container_path: CONTAINER_WORKDIR.to_string(),
            }],
            working_dir: CONTAINER_WORKDIR.to_string(),
            entrypoint: vec!["/bin/sh".to_string(), "-c".to_string()],
            command: vec![launch_command(entrypoint)],
        }
    }

    /// Start a container for a prepared `folder` running `entrypoint`.
    ///
    /// Fails if the runtime rejects the container, if a container from this
    /// provisioner is still running off `folder`, or once [`close`](Self::close)
    /// has begun. A failed log attach is logged; the workload is returned and
    /// never receives messages.
    pub async fn start(
        &self,
        folder: &Path,
        entrypoint: &str,
        runtime_version: u32,
    ) -> Result<Arc<EventedWorkload>> {
        self.start_decorated(folder, entrypoint, runtime_version, |workload| workload)
            .await
    }

    /// Like [`start`](Self::start), with `decorate` applied to the new
    /// workload before its log stream is attached and its observer spawned.
    ///
    /// Every line and the stop reach whatever `decorate` installs on the
    /// workload.
    pub async fn start_decorated<W, F>(
        &self,
        folder: &Path,
        entrypoint: &str,
        runtime_version: u32,
        decorate: F,
    ) -> Result<W>
    where
        F: FnOnce(Arc<EventedWorkload>) -> W + Send,
        W: Send,
    {
        let folder = folder.to_path_buf();
        let _guard = self.lock.acquire().await;

        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        if self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&folder)
        {
            return Err(Error::AlreadyProvisioned(folder));
        }

        let ports = self.allocator.next_free_pair(self.runtime.as_ref()).await?;
        let name = self.container_name(&folder);
        let spec = self.container_spec(name.clone(), &folder, entrypoint, runtime_version, ports);

        let id = self.runtime.create_container(&spec).await?;
        if let Err(e) = self.runtime.start_container(&id).await {
            error!(container_id = %id, error = %e, "Failed to start container");
            if let Err(rm) = self.runtime.remove_container(&id).await {
                warn!(container_id = %id, error = %rm, "Failed to remove unstarted container");
            }
            return Err(e.into());
        }

        let handle = ContainerHandle {
            id,
            name,
            ports,
            folder: folder.clone(),
        };
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(folder.clone(), handle.clone());

        info!(
            container_id = %handle.id,
            name = %handle.name,
            ports = %handle.ports,
            folder = %folder.display(),
            "Container started"
        );

        let workload = Arc::new(EventedWorkload::new(format!(
            "{}:{}",
            self.config.container_host, handle.ports.game
        )));

        let live = self.live.clone();
        let tracked = folder.clone();
        workload.subscribe_stopped(move || {
            live.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&tracked);
        });

        let decorated = decorate(workload.clone());

        if let Err(e) = self
            .runtime
            .attach_logs(&handle.id, log_sink(handle.id.clone(), workload.clone()))
            .await
        {
            warn!(container_id = %handle.id, error = %e, "Failed to attach to container output");
        }

        let observer = LifecycleObserver::new(
            self.runtime.clone(),
            handle.id.clone(),
            workload,
            self.config.poll_interval,
        )
        .spawn();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);

        Ok(decorated)
    }

    /// Whether [`close`](Self::close) has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse further starts, kill and remove every container created here
    /// (exited ones included), then wait for all observers to exit.
    ///
    /// A start in progress finishes first and its container is removed with
    /// the rest. Fails without waiting if a container could not be removed,
    /// since its observer would never see it disappear.
    pub async fn close(&self) -> Result<()> {
        info!(provisioning_id = %self.provisioning_id, "Closing all launched servers");

        {
            let _guard = self.lock.acquire().await;
            self.closed.store(true, Ordering::SeqCst);

            let filter = ContainerFilter::NamePrefix(self.name_prefix());
            let containers = self.runtime.list_containers(&filter).await?;

            let mut failure = None;
            for container in containers {
                info!(container_id = %container.id, "Stopping container");
                if let Err(e) = self.runtime.kill_container(&container.id).await {
                    debug!(container_id = %container.id, error = %e, "Kill failed");
                }
                if let Err(e) = self.runtime.remove_container(&container.id).await {
                    error!(container_id = %container.id, error = %e, "Failed to remove container");
                    failure.get_or_insert(e);
                }
            }
            if let Some(e) = failure {
                return Err(e.into());
            }
        }

        let observers = std::mem::take(
            &mut *self
                .observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for observer in observers {
            if let Err(e) = observer.await {
                error!("Lifecycle observer task panicked: {}", e);
            }
        }

        info!(provisioning_id = %self.provisioning_id, "Provisioner closed");
        Ok(())
    }
}

/// Shell command that runs the server binary without a graphical console.
pub fn launch_command(entrypoint: &str) -> String {
    format!("java -XX:MaxRAMFraction=1 -jar {entrypoint} nogui")
}

/// Split each frame on its trailing newline and deliver it as one line.
fn log_sink(container_id: String, workload: Arc<EventedWorkload>) -> LogSink {
    Arc::new(move |frame: LogFrame| {
        let text = String::from_utf8_lossy(&frame.payload);
        let line = match text.strip_suffix('\n') {
            Some(line) => line,
            None => {
                warn!(
                    container_id = %container_id,
                    frame = %text,
                    "Expected a full line ending with a newline"
                );
                text.as_ref()
            }
        };
        if frame.stream == LogStream::Stderr {
            debug!(container_id = %container_id, line, "stderr");
        }
        workload.deliver_line(line);
    })
}
