// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload request types.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Everything needed to materialize one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Server distribution, e.g. `Paper` or `Spigot`.
    pub server_type: String,
    /// Game version, e.g. `1.20.4`.
    pub server_version: String,
    #[serde(default)]
    pub plugins: Vec<Plugin>,
    #[serde(default)]
    pub world_type: WorldType,
    /// World archives extracted into the server root.
    #[serde(default)]
    pub maps: Vec<PayloadFile>,
    /// Files placed under the server's `plugins/` folder.
    #[serde(default)]
    pub config_files: Vec<PayloadFile>,
}

impl WorkloadSpec {
    /// A bare server with no plugins, worlds or config files.
    pub fn new(server_type: impl Into<String>, server_version: impl Into<String>) -> Self {
        Self {
            server_type: server_type.into(),
            server_version: server_version.into(),
            plugins: Vec::new(),
            world_type: WorldType::default(),
            maps: Vec::new(),
            config_files: Vec::new(),
        }
    }

    /// Runtime (Java) version the server needs.
    pub fn runtime_version(&self) -> u32 {
        runtime_version_for(&self.server_version)
    }
}

/// World generator written to `level-type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorldType {
    #[default]
    Normal,
    Flat,
    LargeBiomes,
    Amplified,
}

impl WorldType {
    /// Value of the `level-type` server property.
    pub fn level_type(&self) -> &'static str {
        match self {
            WorldType::Normal => "NORMAL",
            WorldType::Flat => "FLAT",
            WorldType::LargeBiomes => "LARGEBIOMES",
            WorldType::Amplified => "AMPLIFIED",
        }
    }
}

/// A file shipped with a request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadFile {
    /// File name without extension.
    pub name: String,
    /// Extension without the dot.
    pub extension: String,
    /// Folder offset relative to the target directory, e.g. `Essentials/`.
    #[serde(default)]
    pub offset: String,
    pub data: Vec<u8>,
}

impl PayloadFile {
    pub fn new(
        name: impl Into<String>,
        extension: impl Into<String>,
        offset: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            offset: offset.into(),
            data: data.into(),
        }
    }

    /// `name.extension`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.extension)
    }

    pub fn is_zip(&self) -> bool {
        self.extension.eq_ignore_ascii_case("zip")
    }
}

impl fmt::Debug for PayloadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadFile")
            .field("name", &self.name)
            .field("extension", &self.extension)
            .field("offset", &self.offset)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A plugin to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Plugin {
    /// Resolved from the local usual-plugins folder. Without a version, the
    /// highest version compatible with the server is used.
    Usual {
        name: String,
        #[serde(default)]
        version: Option<String>,
    },
    /// A plugin jar uploaded with the request.
    Uploaded { name: String, data: Vec<u8> },
    /// A plugin shipped as a generic payload file.
    File(PayloadFile),
}

impl Plugin {
    pub fn usual(name: impl Into<String>) -> Self {
        Plugin::Usual {
            name: name.into(),
            version: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Plugin::Usual { name, .. } | Plugin::Uploaded { name, .. } => name,
            Plugin::File(file) => &file.name,
        }
    }
}

/// Dotted numeric version. Missing components compare as zero.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(Vec<u32>);

impl Version {
    pub fn new(parts: impl Into<Vec<u32>>) -> Self {
        Self(parts.into())
    }

    fn part(&self, i: usize) -> u32 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.part(i).cmp(&other.part(i)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Not a dotted numeric version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid version: {0}")]
pub struct InvalidVersion(pub String);

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Version)
            .map_err(|_| InvalidVersion(s.to_string()))
    }
}

impl TryFrom<String> for Version {
    type Error = InvalidVersion;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Java major version required by a game version.
///
/// Unparsable versions fall back to the oldest runtime.
pub fn runtime_version_for(server_version: &str) -> u32 {
    let Ok(version) = server_version.parse::<Version>() else {
        return 8;
    };
    if version >= Version::new([1, 20, 5]) {
        21
    } else if version >= Version::new([1, 18]) {
        17
    } else if version >= Version::new([1, 17]) {
        16
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        let v = |s: &str| s.parse::<Version>().unwrap();
        assert!(v("1.20.4") < v("1.20.5"));
        assert!(v("1.9") < v("1.10"));
        assert_eq!(v("1.18"), v("1.18.0"));
        assert!(v("2") > v("1.99.99"));
        assert_eq!(v("1.20.4").to_string(), "1.20.4");
        assert!("1.20-pre1".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn test_runtime_version_for() {
        assert_eq!(runtime_version_for("1.8.8"), 8);
        assert_eq!(runtime_version_for("1.16.5"), 8);
        assert_eq!(runtime_version_for("1.17"), 16);
        assert_eq!(runtime_version_for("1.17.1"), 16);
        assert_eq!(runtime_version_for("1.18"), 17);
        assert_eq!(runtime_version_for("1.20.4"), 17);
        assert_eq!(runtime_version_for("1.20.5"), 21);
        assert_eq!(runtime_version_for("1.21"), 21);
        assert_eq!(runtime_version_for("latest"), 8);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: WorkloadSpec = serde_json::from_str(
            r#"{
                "server_type": "Paper",
                "server_version": "1.20.4",
                "plugins": [
                    {"kind": "usual", "name": "WorldEdit"},
                    {"kind": "usual", "name": "Essentials", "version": "2.20.1"}
                ],
                "world_type": "FLAT"
            }"#,
        )
        .unwrap();

        assert_eq!(spec.world_type, WorldType::Flat);
        assert_eq!(spec.plugins.len(), 2);
        assert_eq!(spec.plugins[0], Plugin::usual("WorldEdit"));
        assert!(spec.maps.is_empty());
        assert_eq!(spec.runtime_version(), 17);
    }

    #[test]
    fn test_level_type() {
        assert_eq!(WorldType::LargeBiomes.level_type(), "LARGEBIOMES");
        assert_eq!(WorldType::default().level_type(), "NORMAL");
    }

    #[test]
    fn test_payload_file_name() {
        let file = PayloadFile::new("config", "yml", "Essentials/", b"a: 1".to_vec());
        assert_eq!(file.file_name(), "config.yml");
        assert!(!file.is_zip());
        assert!(PayloadFile::new("world", "ZIP", "", Vec::new()).is_zip());
    }
}
