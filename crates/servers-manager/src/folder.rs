// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload folder preparation.
//!
//! A workload folder is bind-mounted into the container as the server's
//! working directory. [`LocalFolderSetup`] materializes it under
//! `<root>/tmp/<id>` from the local payload store:
//!
//! ```text
//! <root>/
//! ├── server-types/<type>/<version>.jar
//! ├── usual-plugins/<name>-<plugin version>-<min game version>-<max game version|LATEST>.jar
//! └── tmp/<id>/            one per workload, removed once the server stops
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::config::Config;
use crate::spec::{PayloadFile, Plugin, Version, WorkloadSpec};

/// Plugin installed into every server; it serves the control port.
pub const COMPANION_PLUGIN: &str = "WatchWolf";

/// Port the companion plugin listens on inside the container.
pub const COMPANION_PORT: u16 = 25566;

/// Port the game listens on inside the container.
pub const GAME_PORT: u16 = 25565;

static USUAL_PLUGIN_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^-]+)-([\d.]+)-([\d.]+)-((\d+(\.\d+)*)|(LATEST))\.jar$")
        .unwrap_or_else(|e| panic!("invalid usual plugin pattern: {e}"))
});

/// Folder preparation errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FolderSetupError {
    /// No server binary for this type and version.
    #[error("Server {server_type} {server_version} is unavailable")]
    WorkloadUnavailable {
        server_type: String,
        server_version: String,
    },

    /// A world was not shipped as a zip archive.
    #[error("World '{0}' must be a zip archive")]
    InvalidWorld(String),

    /// A zip archive could not be read.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The blocking preparation task died.
    #[error("Folder setup task failed: {0}")]
    Task(String),
}

/// Result type for folder preparation.
pub type Result<T> = std::result::Result<T, FolderSetupError>;

/// Materializes and removes workload folders.
#[async_trait]
pub trait FolderSetup: Send + Sync {
    /// Prepare a folder for `spec`, with the server binary named `entrypoint`.
    async fn setup(&self, spec: &WorkloadSpec, entrypoint: &str) -> Result<PathBuf>;

    /// Recursively delete a folder returned by [`setup`](Self::setup).
    fn clear(&self, folder: &Path) -> Result<()>;
}

/// Folder setup backed by the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFolderSetup {
    root: PathBuf,
    reply_host: Option<String>,
    inventory_logged: Arc<AtomicBool>,
}

impl LocalFolderSetup {
    /// Payload store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reply_host: None,
            inventory_logged: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Payload store configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.server_path.clone()).with_reply_host(config.machine_ip.clone())
    }

    /// Host written to the companion plugin's `reply` setting.
    pub fn with_reply_host(mut self, host: Option<String>) -> Self {
        self.reply_host = host;
        self
    }

    pub fn server_types_dir(&self) -> PathBuf {
        self.root.join("server-types")
    }

    pub fn usual_plugins_dir(&self) -> PathBuf {
        self.root.join("usual-plugins")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn prepare(&self, spec: &WorkloadSpec, entrypoint: &str) -> Result<PathBuf> {
        if !self.inventory_logged.swap(true, Ordering::SeqCst) {
            self.log_inventory();
        }

        let server_jar = self.server_jar(spec)?;

        let folder = self.tmp_dir().join(uuid::Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&folder)?;

        match self.populate(&folder, spec, entrypoint, &server_jar) {
            Ok(()) => {
                info!(
                    folder = %folder.display(),
                    server_type = %spec.server_type,
                    server_version = %spec.server_version,
                    "Workload folder prepared"
                );
                Ok(folder)
            }
            Err(e) => {
                if let Err(clear_err) = fs::remove_dir_all(&folder) {
                    warn!(folder = %folder.display(), error = %clear_err, "Failed to remove half-prepared folder");
                }
                Err(e)
            }
        }
    }

    fn server_jar(&self, spec: &WorkloadSpec) -> Result<PathBuf> {
        let unavailable = || FolderSetupError::WorkloadUnavailable {
            server_type: spec.server_type.clone(),
            server_version: spec.server_version.clone(),
        };

        if !is_plain_name(&spec.server_type) || !is_plain_name(&spec.server_version) {
            return Err(unavailable());
        }

        let jar = self
            .server_types_dir()
            .join(&spec.server_type)
            .join(format!("{}.jar", spec.server_version));
        if !jar.is_file() {
            warn!(path = %jar.display(), "Server binary not found on expected location");
            return Err(unavailable());
        }
        Ok(jar)
    }

    fn populate(
        &self,
        folder: &Path,
        spec: &WorkloadSpec,
        entrypoint: &str,
        server_jar: &Path,
    ) -> Result<()> {
        fs::copy(server_jar, folder.join(entrypoint))?;

        fs::write(folder.join("eula.txt"), "eula=true")?;
        fs::write(folder.join("bukkit.yml"), "settings:\n  plugin-profiling: true\n")?;
        fs::write(folder.join("server.properties"), server_properties(spec))?;

        let companion_dir = folder.join("plugins").join(COMPANION_PLUGIN);
        fs::create_dir_all(&companion_dir)?;
        fs::write(
            companion_dir.join("config.yml"),
            companion_config(self.reply_host.as_deref()),
        )?;

        for map in &spec.maps {
            if !map.is_zip() {
                return Err(FolderSetupError::InvalidWorld(map.file_name()));
            }
            extract_zip(&map.data, folder)?;
        }

        let plugins_dir = folder.join("plugins");
        let mut plugins = spec.plugins.clone();
        plugins.push(Plugin::usual(COMPANION_PLUGIN));
        for plugin in &plugins {
            if let Err(e) = self.install_plugin(plugin, &spec.server_version, &plugins_dir) {
                warn!(plugin = plugin.name(), error = %e, "Couldn't get plugin");
            }
        }

        for file in &spec.config_files {
            if !is_safe_offset(&file.offset) {
                warn!(offset = %file.offset, file = %file.file_name(), "Illegal config file offset, ignoring");
                continue;
            }
            if !file.is_zip() && !is_plain_name(&file.file_name()) {
                warn!(file = %file.file_name(), "Illegal config file name, ignoring");
                continue;
            }
            write_config_file(file, &plugins_dir)?;
        }

        Ok(())
    }

    fn install_plugin(&self, plugin: &Plugin, server_version: &str, plugins_dir: &Path) -> Result<()> {
        match plugin {
            Plugin::Usual { name, version } => {
                let Some(source) = self.resolve_usual_plugin(name, version.as_deref(), server_version)?
                else {
                    warn!(plugin = %name, version = ?version, server_version, "No compatible usual plugin, ignoring");
                    return Ok(());
                };
                let file_name = source
                    .file_name()
                    .ok_or_else(|| io::Error::other("usual plugin without file name"))?;
                fs::copy(&source, plugins_dir.join(file_name))?;
            }
            Plugin::Uploaded { name, data } => {
                if !is_plain_name(name) {
                    return Err(io::Error::other(format!("invalid plugin name '{name}'")).into());
                }
                fs::write(plugins_dir.join(format!("{name}.jar")), data)?;
            }
            Plugin::File(file) => {
                let file_name = file.file_name();
                if !is_plain_name(&file_name) {
                    return Err(io::Error::other(format!("invalid plugin name '{file_name}'")).into());
                }
                fs::write(plugins_dir.join(file_name), &file.data)?;
            }
        }
        debug!(plugin = plugin.name(), "Plugin installed");
        Ok(())
    }

    /// Usual plugin jar for `name` compatible with `server_version`.
    ///
    /// With an explicit `version` only that version qualifies, otherwise the
    /// highest compatible one is picked.
    pub fn resolve_usual_plugin(
        &self,
        name: &str,
        version: Option<&str>,
        server_version: &str,
    ) -> Result<Option<PathBuf>> {
        let Ok(game_version) = server_version.parse::<Version>() else {
            return Ok(None);
        };
        let wanted = match version {
            Some(v) => match v.parse::<Version>() {
                Ok(v) => Some(v),
                Err(_) => return Ok(None),
            },
            None => None,
        };

        let dir = self.usual_plugins_dir();
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut best: Option<(Version, PathBuf)> = None;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_file() || !file_name.starts_with(name) || !file_name.ends_with(".jar") {
                continue;
            }
            let Some(candidate) = parse_usual_plugin_file(file_name) else {
                warn!(file = file_name, "Usual plugin file name doesn't match the expected pattern");
                continue;
            };
            if candidate.name != name || !candidate.supports(&game_version) {
                continue;
            }
            if wanted.as_ref().is_some_and(|w| *w != candidate.version) {
                continue;
            }
            if best.as_ref().is_none_or(|(v, _)| candidate.version > *v) {
                best = Some((candidate.version, path));
            }
        }
        Ok(best.map(|(_, path)| path))
    }

    fn log_inventory(&self) {
        let jars = |dir: &Path| -> Vec<String> {
            fs::read_dir(dir)
                .map(|entries| {
                    let mut names: Vec<String> = entries
                        .filter_map(|e| e.ok())
                        .filter_map(|e| e.file_name().into_string().ok())
                        .filter(|n| n.ends_with(".jar"))
                        .collect();
                    names.sort();
                    names
                })
                .unwrap_or_default()
        };

        info!(usual_plugins = ?jars(&self.usual_plugins_dir()), "Usual plugins");

        let mut servers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Ok(types) = fs::read_dir(self.server_types_dir()) {
            for server_type in types.filter_map(|e| e.ok()) {
                let versions = jars(&server_type.path())
                    .into_iter()
                    .map(|n| n.trim_end_matches(".jar").to_string())
                    .collect();
                servers.insert(server_type.file_name().to_string_lossy().into_owned(), versions);
            }
        }
        info!(servers = ?servers, "Servers available");
    }
}

#[async_trait]
impl FolderSetup for LocalFolderSetup {
    async fn setup(&self, spec: &WorkloadSpec, entrypoint: &str) -> Result<PathBuf> {
        let this = self.clone();
        let spec = spec.clone();
        let entrypoint = entrypoint.to_string();
        tokio::task::spawn_blocking(move || this.prepare(&spec, &entrypoint))
            .await
            .map_err(|e| FolderSetupError::Task(e.to_string()))?
    }

    fn clear(&self, folder: &Path) -> Result<()> {
        match fs::remove_dir_all(folder) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(folder = %folder.display(), "Folder already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Parsed usual plugin file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsualPluginFile {
    pub name: String,
    pub version: Version,
    pub min_game_version: Version,
    /// `None` for `LATEST`.
    pub max_game_version: Option<Version>,
}

impl UsualPluginFile {
    /// Whether the plugin runs on `game_version`.
    pub fn supports(&self, game_version: &Version) -> bool {
        *game_version >= self.min_game_version
            && self
                .max_game_version
                .as_ref()
                .is_none_or(|max| game_version <= max)
    }
}

/// Parse `<name>-<version>-<min>-<max|LATEST>.jar`.
pub fn parse_usual_plugin_file(file_name: &str) -> Option<UsualPluginFile> {
    let caps = USUAL_PLUGIN_FILE.captures(file_name)?;
    let max = caps.get(4)?.as_str();
    Some(UsualPluginFile {
        name: caps.get(1)?.as_str().to_string(),
        version: caps.get(2)?.as_str().parse().ok()?,
        min_game_version: caps.get(3)?.as_str().parse().ok()?,
        max_game_version: match max {
            "LATEST" => None,
            v => Some(v.parse().ok()?),
        },
    })
}

fn server_properties(spec: &WorkloadSpec) -> String {
    [
        "online-mode=false".to_string(),
        "white-list=true".to_string(),
        "motd=Minecraft test server".to_string(),
        "max-players=100".to_string(),
        "spawn-protection=0".to_string(),
        format!("server-port={GAME_PORT}"),
        format!("level-type={}", spec.world_type.level_type()),
    ]
    .join("\n")
}

fn companion_config(reply_host: Option<&str>) -> String {
    let reply = reply_host.map(|h| format!("{h}:8000")).unwrap_or_default();
    [
        "target-ip: ".to_string(),
        format!("use-port: {COMPANION_PORT}"),
        format!("reply: {reply}"),
        "key: ".to_string(),
    ]
    .join("\n")
}

fn write_config_file(file: &PayloadFile, plugins_dir: &Path) -> Result<()> {
    let target_dir = plugins_dir.join(&file.offset);
    fs::create_dir_all(&target_dir)?;
    if file.is_zip() {
        extract_zip(&file.data, &target_dir)
    } else {
        fs::write(target_dir.join(file.file_name()), &file.data)?;
        Ok(())
    }
}

/// Extract a zip archive into `target`, skipping entries that would escape it.
fn extract_zip(data: &[u8], target: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "Skipping archive entry outside the target folder");
            continue;
        };
        let out = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&out)?;
        io::copy(&mut entry, &mut file)?;
    }
    Ok(())
}

/// Offsets must stay inside `plugins/`.
fn is_safe_offset(offset: &str) -> bool {
    !offset.starts_with(['/', '\\'])
        && Path::new(offset)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && !offset.split(['/', '\\']).any(|part| part == "..")
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
