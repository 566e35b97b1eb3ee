// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for servers-manager.

use std::path::PathBuf;
use std::time::Duration;

use crate::observer::DEFAULT_POLL_INTERVAL;
use crate::ports::DEFAULT_BASE_PORT;

/// Default image template; `{version}` is replaced by the runtime version.
pub const DEFAULT_IMAGE_TEMPLATE: &str = "openjdk:{version}";

/// Default host part of a freshly provisioned workload's address.
pub const DEFAULT_CONTAINER_HOST: &str = "127.0.0.1";

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// LAN-facing host handed to callers on the same private network
    pub machine_ip: Option<String>,
    /// WAN-facing host handed to every other caller
    pub public_ip: Option<String>,
    /// Root holding `server-types/`, `usual-plugins/` and `tmp/`
    pub server_path: PathBuf,
    /// First port of the first port pair
    pub base_port: u16,
    /// Interval between container liveness checks
    pub poll_interval: Duration,
    /// Container image template
    pub image_template: String,
    /// Host part of the container-local address
    pub container_host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            machine_ip: None,
            public_ip: None,
            server_path: PathBuf::from("."),
            base_port: DEFAULT_BASE_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            image_template: DEFAULT_IMAGE_TEMPLATE.to_string(),
            container_host: DEFAULT_CONTAINER_HOST.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_port = match non_empty("SERVERS_MANAGER_BASE_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(v.clone()))?,
            None => defaults.base_port,
        };

        let poll_interval = match non_empty("SERVERS_MANAGER_POLL_INTERVAL_MS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or_else(|| ConfigError::InvalidPollInterval(v.clone()))?,
            None => defaults.poll_interval,
        };

        Ok(Self {
            machine_ip: non_empty("MACHINE_IP"),
            public_ip: non_empty("PUBLIC_IP"),
            server_path: non_empty("SERVER_PATH_SHIFT")
                .map(PathBuf::from)
                .unwrap_or(defaults.server_path),
            base_port,
            poll_interval,
            image_template: non_empty("SERVERS_MANAGER_IMAGE").unwrap_or(defaults.image_template),
            container_host: non_empty("SERVERS_MANAGER_CONTAINER_HOST")
                .unwrap_or(defaults.container_host),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The base port is not a valid port number.
    #[error("Invalid base port: {0}")]
    InvalidPort(String),
    /// The poll interval is not a positive number of milliseconds.
    #[error("Invalid poll interval: {0}")]
    InvalidPollInterval(String),
}
