// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime module - container engine clients.

pub mod docker;
pub mod mock;
mod traits;

pub use docker::{DockerRuntime, DockerRuntimeConfig};
pub use mock::MockRuntime;
pub use traits::*;
