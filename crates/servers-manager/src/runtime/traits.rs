// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.
//!
//! Defines the abstract interface the provisioner and observers use to talk
//! to a container engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors from runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A runtime command exited unsuccessfully.
    #[error("{command} failed: {stderr}")]
    CommandFailed {
        /// The runtime command that was issued (e.g. `create`, `start`).
        command: String,
        /// Standard error output of the command.
        stderr: String,
    },

    /// The container does not exist (or is no longer live).
    #[error("Container not found: {0}")]
    NotFound(String),

    /// A container with the same name already exists.
    #[error("Container name already in use: {0}")]
    Conflict(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization of runtime output failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Transport protocol of a port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// Publishes a container port on a host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl PortBinding {
    /// TCP binding.
    pub fn tcp(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    /// UDP binding.
    pub fn udp(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
            protocol: Protocol::Udp,
        }
    }
}

/// Read-write bind mount of a host folder into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Folder on the host.
    pub host_path: PathBuf,
    /// Mount point inside the container.
    pub container_path: String,
}

/// Everything needed to create a container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name, unique within the runtime.
    pub name: String,
    /// Image reference (e.g. `openjdk:17`).
    pub image: String,
    /// Published ports.
    pub ports: Vec<PortBinding>,
    /// Bind mounts.
    pub mounts: Vec<BindMount>,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Entrypoint override.
    pub entrypoint: Vec<String>,
    /// Arguments passed to the entrypoint.
    pub command: Vec<String>,
}

/// A live container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Runtime-assigned id.
    pub id: String,
    /// Container names.
    pub names: Vec<String>,
    /// Host ports the container currently publishes.
    pub published_ports: Vec<u16>,
}

/// Which containers to list.
///
/// `All` and `Id` only see running containers. `NamePrefix` also sees exited
/// ones, so teardown can remove containers whose process already ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFilter {
    /// Every running container, including ones this process did not create.
    All,
    /// The container with exactly this id, if running.
    Id(String),
    /// Containers with a name starting with this prefix, running or exited.
    NamePrefix(String),
}

impl ContainerFilter {
    /// Whether exited containers are listed too.
    pub fn includes_exited(&self) -> bool {
        matches!(self, ContainerFilter::NamePrefix(_))
    }
}

impl ContainerFilter {
    /// Whether `summary` passes the filter.
    pub fn matches(&self, summary: &ContainerSummary) -> bool {
        match self {
            ContainerFilter::All => true,
            ContainerFilter::Id(id) => summary.id == *id,
            ContainerFilter::NamePrefix(prefix) => summary
                .names
                .iter()
                .any(|n| n.trim_start_matches('/').starts_with(prefix.as_str())),
        }
    }
}

/// Output stream a log frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One chunk pushed by an attached log stream, normally a full line
/// including its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    /// Stream the frame was read from.
    pub stream: LogStream,
    /// Raw frame bytes.
    pub payload: Vec<u8>,
}

impl LogFrame {
    /// Frame read from stdout.
    pub fn stdout(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: LogStream::Stdout,
            payload: payload.into(),
        }
    }

    /// Frame read from stderr.
    pub fn stderr(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream: LogStream::Stderr,
            payload: payload.into(),
        }
    }
}

/// Callback receiving log frames, invoked inline by the runtime's reader task.
pub type LogSink = Arc<dyn Fn(LogFrame) + Send + Sync>;

/// Trait for container runtimes.
///
/// Implementations are pure runtime clients: they hold no workload state and
/// never interpret log contents.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime type identifier (e.g. "docker", "mock")
    fn runtime_type(&self) -> &'static str;

    /// Create (but do not start) a container. Returns its id.
    ///
    /// Creation is atomic: on error no container exists and no port is held.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Kill a running container.
    async fn kill_container(&self, id: &str) -> Result<()>;

    /// Remove a container, forcing it down if still running.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// List containers matching `filter`.
    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>>;

    /// Host ports currently published by any live container.
    async fn published_ports(&self) -> Result<HashSet<u16>> {
        Ok(self
            .list_containers(&ContainerFilter::All)
            .await?
            .into_iter()
            .flat_map(|c| c.published_ports)
            .collect())
    }

    /// Follow the combined stdout/stderr of a container.
    ///
    /// Returns once the subscription is established; frames are then pushed
    /// to `sink` from a runtime-owned task until the container exits.
    async fn attach_logs(&self, id: &str, sink: LogSink) -> Result<()>;
}
