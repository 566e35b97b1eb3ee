// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Servers manager: the entry point that starts workloads for remote callers.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use servers_manager::{Config, DockerRuntime, LocalFolderSetup, ServersManager, WorkloadSpec};
//!
//! let config = Config::from_env()?;
//! let manager = ServersManager::builder(
//!     Arc::new(DockerRuntime::from_env()),
//!     Arc::new(LocalFolderSetup::from_config(&config)),
//! )
//! .config(&config)
//! .build();
//!
//! let server = manager
//!     .start_workload(&WorkloadSpec::new("Paper", "1.20.4"), Some(caller_ip))
//!     .await?;
//! server.subscribe_started(|| println!("ready"));
//! println!("{}", server.address());
//!
//! manager.close().await?;
//! ```

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::folder::FolderSetup;
use crate::ip::IpTranslator;
use crate::provisioner::{AllocationLock, Provisioner, ProvisionerConfig};
use crate::runtime::ContainerRuntime;
use crate::spec::WorkloadSpec;
use crate::workload::{EventedWorkload, FailureAwareWorkload, WorkloadEvents};

/// File name of the server binary inside every workload folder.
pub const TARGET_SERVER_JAR: &str = "ServersManager.jar";

/// Builder for a [`ServersManager`].
pub struct ServersManagerBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    folder_setup: Arc<dyn FolderSetup>,
    lock: AllocationLock,
    provisioner: ProvisionerConfig,
    lan_host: Option<String>,
    wan_host: Option<String>,
}

impl ServersManagerBuilder {
    /// Apply every setting from `config`.
    pub fn config(mut self, config: &Config) -> Self {
        self.provisioner = ProvisionerConfig::from(config);
        self.lan_host = config.machine_ip.clone();
        self.wan_host = config.public_ip.clone();
        self
    }

    /// Share an allocation lock with other managers on the same runtime.
    pub fn allocation_lock(mut self, lock: AllocationLock) -> Self {
        self.lock = lock;
        self
    }

    /// Set the first port of the first pair.
    ///
    /// Default: 8001
    pub fn base_port(mut self, port: u16) -> Self {
        self.provisioner.base_port = port;
        self
    }

    /// Set the container liveness poll interval.
    ///
    /// Default: 1.5 seconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.provisioner.poll_interval = interval;
        self
    }

    /// Set the image template (`{version}` is the runtime version).
    ///
    /// Default: `openjdk:{version}`
    pub fn image_template(mut self, template: impl Into<String>) -> Self {
        self.provisioner.image_template = template.into();
        self
    }

    /// Set the host handed to callers on the local network.
    pub fn lan_host(mut self, host: impl Into<String>) -> Self {
        self.lan_host = Some(host.into());
        self
    }

    /// Set the host handed to remote callers.
    pub fn wan_host(mut self, host: impl Into<String>) -> Self {
        self.wan_host = Some(host.into());
        self
    }

    pub fn build(self) -> ServersManager {
        ServersManager {
            folder_setup: self.folder_setup,
            provisioner: Provisioner::with_lock(self.runtime, self.provisioner, self.lock),
            translator: IpTranslator::new(self.lan_host, self.wan_host),
            closed: AtomicBool::new(false),
        }
    }
}

/// Starts workloads, translates their addresses and cleans up after them.
pub struct ServersManager {
    folder_setup: Arc<dyn FolderSetup>,
    provisioner: Provisioner,
    translator: IpTranslator,
    closed: AtomicBool,
}

impl ServersManager {
    /// Create a builder from the two required collaborators.
    pub fn builder(
        runtime: Arc<dyn ContainerRuntime>,
        folder_setup: Arc<dyn FolderSetup>,
    ) -> ServersManagerBuilder {
        ServersManagerBuilder {
            runtime,
            folder_setup,
            lock: AllocationLock::new(),
            provisioner: ProvisionerConfig::default(),
            lan_host: None,
            wan_host: None,
        }
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn translator(&self) -> &IpTranslator {
        &self.translator
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Prepare, provision and hand out one workload for `caller`.
    ///
    /// The returned workload's address is already translated for the
    /// caller. Its folder is deleted once the container stops.
    pub async fn start_workload(
        &self,
        spec: &WorkloadSpec,
        caller: Option<IpAddr>,
    ) -> Result<Arc<FailureAwareWorkload>> {
        self.start_workload_with(spec, caller, |_| {}).await
    }

    /// Like [`start_workload`](Self::start_workload), calling `subscribe` on
    /// the workload before the first log line or stop can reach it.
    pub async fn start_workload_with<F>(
        &self,
        spec: &WorkloadSpec,
        caller: Option<IpAddr>,
        subscribe: F,
    ) -> Result<Arc<FailureAwareWorkload>>
    where
        F: FnOnce(&Arc<FailureAwareWorkload>) + Send,
    {
        if self.is_closed() {
            return Err(Error::ShutDown);
        }

        let folder = self.folder_setup.setup(spec, TARGET_SERVER_JAR).await?;
        info!(
            server_type = %spec.server_type,
            server_version = %spec.server_version,
            folder = %folder.display(),
            "Starting server"
        );

        let folder_setup = self.folder_setup.clone();
        let stopped_folder = folder.clone();
        let translator = &self.translator;
        let decorate = move |inner: Arc<EventedWorkload>| {
            // inner handle: the caller may drop the wrapper
            inner.subscribe_stopped(move || {
                info!(folder = %stopped_folder.display(), "Server stopped; clearing folder");
                clear_folder(folder_setup.as_ref(), &stopped_folder);
            });

            let workload = FailureAwareWorkload::wrap(inner);
            workload.set_address(translator.translate(&workload.address(), caller));
            subscribe(&workload);
            workload
        };

        let workload = match self
            .provisioner
            .start_decorated(&folder, TARGET_SERVER_JAR, spec.runtime_version(), decorate)
            .await
        {
            Ok(workload) => workload,
            Err(e) => {
                clear_folder(self.folder_setup.as_ref(), &folder);
                return Err(e);
            }
        };

        info!(address = %workload.address(), "Server provisioned");
        Ok(workload)
    }

    /// Stop every container started here and wait for their observers.
    ///
    /// Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("Servers manager already closed");
            return Ok(());
        }
        self.provisioner.close().await
    }
}

fn clear_folder(folder_setup: &dyn FolderSetup, folder: &Path) {
    if let Err(e) = folder_setup.clear(folder) {
        error!(folder = %folder.display(), error = %e, "Failed to clear server folder");
    }
}
