// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Servers Manager - start one game server and follow it
//!
//! Usage: `servers-manager <server type> <server version>`
//!
//! Prepares the workload folder, starts the container, logs the server's
//! events and tears everything down on Ctrl-C.

use std::sync::Arc;
use tracing::{error, info, warn};

use servers_manager::runtime::DockerRuntime;
use servers_manager::{Config, LocalFolderSetup, ServersManager, WorkloadEvents, WorkloadSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "servers_manager=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let (Some(server_type), Some(server_version)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: servers-manager <server type> <server version>");
    };

    let config = Config::from_env()?;
    info!(
        server_path = %config.server_path.display(),
        base_port = config.base_port,
        machine_ip = ?config.machine_ip,
        public_ip = ?config.public_ip,
        "Starting Servers Manager"
    );

    let runtime = Arc::new(DockerRuntime::from_env());
    let manager = ServersManager::builder(runtime, Arc::new(LocalFolderSetup::from_config(&config)))
        .config(&config)
        .build();

    let server = manager
        .start_workload_with(&WorkloadSpec::new(server_type, server_version), None, |server| {
            let address = server.address();
            {
                let address = address.clone();
                server.subscribe_started(move || info!(address = %address, "Server ready"));
            }
            server.subscribe_message(|line| info!(target: "servers_manager::server", "{}", line));
            server.subscribe_exception(|payload| error!(exception = %payload, "Server raised an exception"));
            server.subscribe_stopped(move || info!(address = %address, "Server stopped"));
        })
        .await?;
    info!(address = %server.address(), "Server container running");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    manager.close().await?;

    info!("Servers Manager shut down");

    Ok(())
}
