// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker runtime implementation.
//!
//! Drives the `docker` CLI. Pure runtime client, no workload state:
//! - `docker create` / `start` / `kill` / `rm -f`
//! - `docker ps --format '{{json .}}'` for the live container list
//! - `docker logs --follow` for the push-based log stream

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::traits::*;

/// Docker runtime configuration
#[derive(Debug, Clone)]
pub struct DockerRuntimeConfig {
    /// Path or name of the docker CLI binary
    pub binary: String,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerRuntimeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            binary: std::env::var("DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
        }
    }
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// Build the `docker ps` argument list for a filter.
fn ps_args(filter: &ContainerFilter) -> Vec<String> {
    let mut args = vec![
        "ps".to_string(),
        "--no-trunc".to_string(),
        "--format".to_string(),
        "{{json .}}".to_string(),
    ];
    if filter.includes_exited() {
        args.push("--all".to_string());
    }
    match filter {
        ContainerFilter::All => {}
        ContainerFilter::Id(id) => {
            args.push("--filter".to_string());
            args.push(format!("id={id}"));
        }
        ContainerFilter::NamePrefix(prefix) => {
            args.push("--filter".to_string());
            args.push(format!("name={prefix}"));
        }
    }
    args
}

/// Build the `docker create` argument list for a container spec.
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!(
            "{}:{}/{}",
            port.host_port, port.container_port, port.protocol
        ));
    }

    for mount in &spec.mounts {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            mount.host_path.display(),
            mount.container_path
        ));
    }

    if !spec.working_dir.is_empty() {
        args.push("-w".to_string());
        args.push(spec.working_dir.clone());
    }

    // --entrypoint takes a single executable; the rest of the entrypoint
    // vector goes in front of the command
    let mut entrypoint = spec.entrypoint.iter();
    if let Some(executable) = entrypoint.next() {
        args.push("--entrypoint".to_string());
        args.push(executable.clone());
    }

    args.push(spec.image.clone());
    args.extend(entrypoint.cloned());
    args.extend(spec.command.iter().cloned());
    args
}

/// Extract the published host ports from a `docker ps` ports column.
///
/// Format: `0.0.0.0:8001->25565/tcp, :::8001->25565/tcp, 25566/tcp`.
/// Entries without `->` are exposed but not published and are skipped.
fn parse_published_ports(ports: &str) -> Vec<u16> {
    let mut published = Vec::new();

    for entry in ports.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((host, _container)) = entry.split_once("->") else {
            continue;
        };
        let host_ports = host.rsplit(':').next().unwrap_or(host);
        match host_ports.split_once('-') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.parse::<u16>(), end.parse::<u16>()) {
                    published.extend(start..=end);
                }
            }
            None => {
                if let Ok(port) = host_ports.parse::<u16>() {
                    published.push(port);
                }
            }
        }
    }

    published.sort_unstable();
    published.dedup();
    published
}

/// Parse one `docker ps` JSON line.
fn parse_ps_line(line: &str) -> Result<ContainerSummary> {
    let entry: PsEntry = serde_json::from_str(line)?;
    Ok(ContainerSummary {
        id: entry.id,
        names: entry
            .names
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect(),
        published_ports: parse_published_ports(&entry.ports),
    })
}

/// Map a failed docker invocation onto a runtime error.
fn command_error(command: &str, stderr: String) -> RuntimeError {
    if stderr.contains("No such container") {
        RuntimeError::NotFound(stderr)
    } else if stderr.contains("is already in use") {
        RuntimeError::Conflict(stderr)
    } else {
        RuntimeError::CommandFailed {
            command: command.to_string(),
            stderr,
        }
    }
}

/// Container runtime backed by the docker CLI.
pub struct DockerRuntime {
    config: DockerRuntimeConfig,
}

impl DockerRuntime {
    /// Create a new docker runtime
    pub fn new(config: DockerRuntimeConfig) -> Self {
        Self { config }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(DockerRuntimeConfig::from_env())
    }

    /// Run one docker command to completion, returning its stdout.
    async fn docker(&self, args: &[String]) -> Result<String> {
        let command = args.first().cloned().unwrap_or_default();
        debug!(binary = %self.config.binary, args = ?args, "Running docker command");

        let output = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(command_error(&command, stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let stdout = self.docker(&create_args(spec)).await?;
        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Other(
                "docker create returned no container id".to_string(),
            ));
        }
        info!(container_id = %id, name = %spec.name, image = %spec.image, "Container created");
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker(&["start".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        self.docker(&["kill".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.docker(&["rm".to_string(), "-f".to_string(), id.to_string()])
            .await?;
        Ok(())
    }

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>> {
        let args = ps_args(filter);
        let stdout = self.docker(&args).await?;
        let mut containers = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let summary = parse_ps_line(line)?;
            // docker's name filter is a substring match
            if filter.matches(&summary) {
                containers.push(summary);
            }
        }
        Ok(containers)
    }

    async fn attach_logs(&self, id: &str, sink: LogSink) -> Result<()> {
        let mut child = Command::new(&self.config.binary)
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return Err(RuntimeError::Other(
                "docker logs did not expose its output pipes".to_string(),
            ));
        };

        let container_id = id.to_string();
        tokio::spawn(async move {
            let mut out = BufReader::new(stdout);
            let mut err = BufReader::new(stderr);
            let mut out_buf = Vec::new();
            let mut err_buf = Vec::new();
            let mut out_open = true;
            let mut err_open = true;

            // Partially read bytes stay in the buffers when the other branch
            // wins, so the next read_until continues the same frame.
            while out_open || err_open {
                tokio::select! {
                    read = out.read_until(b'\n', &mut out_buf), if out_open => match read {
                        Ok(0) => out_open = false,
                        Ok(_) => sink(LogFrame::stdout(std::mem::take(&mut out_buf))),
                        Err(e) => {
                            warn!(container_id = %container_id, error = %e, "stdout log stream failed");
                            out_open = false;
                        }
                    },
                    read = err.read_until(b'\n', &mut err_buf), if err_open => match read {
                        Ok(0) => err_open = false,
                        Ok(_) => sink(LogFrame::stderr(std::mem::take(&mut err_buf))),
                        Err(e) => {
                            warn!(container_id = %container_id, error = %e, "stderr log stream failed");
                            err_open = false;
                        }
                    },
                }
            }

            match child.wait().await {
                Ok(status) => {
                    debug!(container_id = %container_id, status = %status, "Log stream closed")
                }
                Err(e) => warn!(container_id = %container_id, error = %e, "Failed to reap docker logs"),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn server_spec() -> ContainerSpec {
        ContainerSpec {
            name: "mc-server-1a2b3c4d-1700000000000".to_string(),
            image: "openjdk:17".to_string(),
            ports: vec![
                PortBinding::tcp(8001, 25565),
                PortBinding::udp(8001, 25565),
                PortBinding::tcp(8002, 25566),
            ],
            mounts: vec![BindMount {
                host_path: PathBuf::from("/srv/tmp/1700000000000"),
                container_path: "/server".to_string(),
            }],
            working_dir: "/server".to_string(),
            entrypoint: vec!["/bin/sh".to_string(), "-c".to_string()],
            command: vec!["java -XX:MaxRAMFraction=1 -jar server.jar nogui".to_string()],
        }
    }

    #[test]
    fn test_create_args() {
        let args = create_args(&server_spec());
        assert_eq!(
            args,
            vec![
                "create",
                "--name",
                "mc-server-1a2b3c4d-1700000000000",
                "-p",
                "8001:25565/tcp",
                "-p",
                "8001:25565/udp",
                "-p",
                "8002:25566/tcp",
                "-v",
                "/srv/tmp/1700000000000:/server",
                "-w",
                "/server",
                "--entrypoint",
                "/bin/sh",
                "openjdk:17",
                "-c",
                "java -XX:MaxRAMFraction=1 -jar server.jar nogui",
            ]
        );
    }

    #[test]
    fn test_create_args_without_entrypoint() {
        let spec = ContainerSpec {
            entrypoint: vec![],
            command: vec!["sleep".to_string(), "10".to_string()],
            working_dir: String::new(),
            mounts: vec![],
            ports: vec![],
            ..server_spec()
        };
        assert_eq!(
            create_args(&spec),
            vec![
                "create",
                "--name",
                "mc-server-1a2b3c4d-1700000000000",
                "openjdk:17",
                "sleep",
                "10"
            ]
        );
    }

    #[test]
    fn test_parse_published_ports() {
        let ports = parse_published_ports(
            "0.0.0.0:8001->25565/tcp, :::8001->25565/tcp, 0.0.0.0:8001->25565/udp, [::]:8002->25566/tcp",
        );
        assert_eq!(ports, vec![8001, 8002]);
    }

    #[test]
    fn test_parse_published_ports_skips_unpublished_and_expands_ranges() {
        assert_eq!(parse_published_ports("25566/tcp"), Vec::<u16>::new());
        assert_eq!(
            parse_published_ports("0.0.0.0:9000-9002->9000-9002/tcp"),
            vec![9000, 9001, 9002]
        );
        assert!(parse_published_ports("").is_empty());
    }

    #[test]
    fn test_ps_args() {
        assert_eq!(ps_args(&ContainerFilter::All), vec!["ps", "--no-trunc", "--format", "{{json .}}"]);

        let by_id = ps_args(&ContainerFilter::Id("abc".into()));
        assert!(!by_id.contains(&"--all".to_string()));
        assert_eq!(by_id[by_id.len() - 2..], ["--filter", "id=abc"]);

        let by_prefix = ps_args(&ContainerFilter::NamePrefix("mc-server-1234abcd-".into()));
        assert!(by_prefix.contains(&"--all".to_string()));
        assert_eq!(by_prefix.last().unwrap(), "name=mc-server-1234abcd-");
    }

    #[test]
    fn test_parse_ps_line() {
        let line = r#"{"Command":"\"/bin/sh -c 'java'\"","ID":"4f1c0a","Image":"openjdk:17","Names":"mc-server-1a2b3c4d-17","Ports":"0.0.0.0:8003->25565/tcp, 0.0.0.0:8004->25566/tcp","State":"running","Status":"Up 3 seconds"}"#;
        let summary = parse_ps_line(line).unwrap();
        assert_eq!(summary.id, "4f1c0a");
        assert_eq!(summary.names, vec!["mc-server-1a2b3c4d-17"]);
        assert_eq!(summary.published_ports, vec![8003, 8004]);
    }

    #[test]
    fn test_parse_ps_line_rejects_garbage() {
        assert!(matches!(parse_ps_line("not json"), Err(RuntimeError::Json(_))));
    }

    #[test]
    fn test_command_error_mapping() {
        assert!(matches!(
            command_error("kill", "Error response from daemon: No such container: abc".to_string()),
            RuntimeError::NotFound(_)
        ));
        assert!(matches!(
            command_error(
                "create",
                "Conflict. The container name \"/x\" is already in use".to_string()
            ),
            RuntimeError::Conflict(_)
        ));
        assert!(matches!(
            command_error("start", "boom".to_string()),
            RuntimeError::CommandFailed { .. }
        ));
    }
}
