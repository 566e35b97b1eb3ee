// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for servers-manager integration tests.
//!
//! Provides a payload store on disk and small polling helpers.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

/// Poll interval used by tests that wait for a container to disappear.
pub const FAST_POLL: Duration = Duration::from_millis(10);

/// A payload store with one server binary (`Paper` `1.20.4`) and the
/// companion plugin.
pub fn payload_store() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let root = dir.path();

    fs::create_dir_all(root.join("server-types/Paper")).unwrap();
    fs::write(root.join("server-types/Paper/1.20.4.jar"), b"paper-1.20.4").unwrap();

    fs::create_dir_all(root.join("usual-plugins")).unwrap();
    fs::write(root.join("usual-plugins/WatchWolf-0.1-1.8-LATEST.jar"), b"watchwolf").unwrap();

    dir
}

/// Number of entries in `dir`, zero if it does not exist.
pub fn entry_count(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Wait up to two seconds for `condition` to hold.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Shared log of events for listener assertions.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}
