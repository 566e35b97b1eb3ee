// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Servers Manager - Game Server Provisioning
//!
//! This crate starts short-lived game servers inside containers for a remote
//! caller, watches them until they stop, and turns their log output into
//! events (ready, exception, stopped).
//!
//! # Architecture
//!
//! ```text
//!      caller (RPC layer)
//!             │ start_workload(spec, caller ip)
//!             ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        ServersManager                          │
//! │  ┌─────────────┐   ┌──────────────────────────┐  ┌──────────┐  │
//! │  │ FolderSetup │──►│       Provisioner        │─►│    IP    │  │
//! │  │ (tmp/<id>)  │   │ lock: ports+create+start │  │Translator│  │
//! │  └─────────────┘   └────────────┬─────────────┘  └──────────┘  │
//! └─────────────────────────────────┼──────────────────────────────┘
//!                                   │
//!             ┌─────────────────────┼────────────────────┐
//!             │ log frames          │ poll (1.5s)        │ docker CLI
//!             ▼                     ▼                    ▼
//!   ┌───────────────────┐  ┌───────────────────┐  ┌───────────────┐
//!   │ FailureAware      │◄─│ LifecycleObserver │  │   Container   │
//!   │ (Evented)Workload │  └───────────────────┘  │    runtime    │
//!   └───────────────────┘                         └───────────────┘
//!     started / stopped / message / exception
//! ```
//!
//! # Port Allocation
//!
//! Every server publishes two consecutive host ports, game and control,
//! starting at `8001`. The first pair with neither port published by any
//! live container wins. Selection, container creation and start run under
//! one [`AllocationLock`](provisioner::AllocationLock).
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `MACHINE_IP` | No | - | Host handed to callers on the local network |
//! | `PUBLIC_IP` | No | - | Host handed to remote callers |
//! | `SERVER_PATH_SHIFT` | No | `.` | Root of `server-types/`, `usual-plugins/` and `tmp/` |
//! | `SERVERS_MANAGER_BASE_PORT` | No | `8001` | First port of the first pair |
//! | `SERVERS_MANAGER_POLL_INTERVAL_MS` | No | `1500` | Liveness poll interval |
//! | `SERVERS_MANAGER_IMAGE` | No | `openjdk:{version}` | Container image template |
//! | `SERVERS_MANAGER_CONTAINER_HOST` | No | `127.0.0.1` | Host of a fresh workload address |
//! | `DOCKER_BIN` | No | `docker` | Docker CLI binary |
//!
//! # Modules
//!
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`folder`]: Workload folder preparation
//! - [`ip`]: Address translation
//! - [`manager`]: The servers manager
//! - [`observer`]: Container liveness polling
//! - [`ports`]: Port pair allocation
//! - [`provisioner`]: Container creation and teardown
//! - [`runtime`]: Container runtime clients (docker, mock)
//! - [`spec`]: Workload request types
//! - [`workload`]: Workload handles and log classification

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for provisioning.
pub mod error;

/// Workload folder preparation.
pub mod folder;

/// Caller-dependent address translation.
pub mod ip;

/// Orchestration of folder setup, provisioning and cleanup.
pub mod manager;

/// Background container liveness polling.
pub mod observer;

/// Port pair allocation.
pub mod ports;

/// Container creation, start and teardown.
pub mod provisioner;

/// Container runtime clients.
pub mod runtime;

/// Workload request types.
pub mod spec;

/// Workload handles and log classification.
pub mod workload;

pub use config::Config;
pub use error::Error;
pub use folder::{FolderSetup, LocalFolderSetup};
pub use manager::ServersManager;
pub use runtime::{ContainerRuntime, DockerRuntime, MockRuntime};
pub use spec::WorkloadSpec;
pub use workload::{EventedWorkload, FailureAwareWorkload, WorkloadEvents};
