// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for servers-manager.

use std::path::PathBuf;

use thiserror::Error;

use crate::folder::FolderSetupError;

/// Provisioning errors.
///
/// Only synchronous failures of a start or close surface here. Lifecycle and
/// log outcomes (started, stopped, exception) are events on the workload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The workload folder could not be prepared.
    #[error(transparent)]
    FolderSetup(#[from] FolderSetupError),

    /// The container runtime rejected the container.
    #[error("Runtime provisioning failed: {0}")]
    Provision(#[from] crate::runtime::RuntimeError),

    /// A live container already runs from this folder.
    #[error("Folder already provisioned: {}", .0.display())]
    AlreadyProvisioned(PathBuf),

    /// The manager has been closed.
    #[error("Servers manager is shut down")]
    ShutDown,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the requested server type/version has no payload available.
    pub fn is_workload_unavailable(&self) -> bool {
        matches!(
            self,
            Error::FolderSetup(FolderSetupError::WorkloadUnavailable { .. })
        )
    }
}

/// Result type using servers-manager Error.
pub type Result<T> = std::result::Result<T, Error>;
