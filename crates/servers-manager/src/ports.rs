// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Port pair allocation.
//!
//! Every workload publishes two consecutive host ports: the game port and
//! the control port of the companion plugin. Pairs are laid out as
//! `(base, base+1), (base+2, base+3), ...`; a pair is free when neither port
//! is published by *any* live container, including containers this process
//! did not create.
//!
//! Nothing is cached. The published set is queried fresh on every call, so a
//! pair released by a terminated container is reusable immediately. Callers
//! must hold the allocation lock from the query until the new container is
//! visible in the runtime, otherwise two concurrent starts can pick the same
//! pair.

use std::collections::HashSet;
use std::fmt;

use crate::runtime::{self, ContainerRuntime};

/// Default first port of the first pair.
pub const DEFAULT_BASE_PORT: u16 = 8001;

/// Two consecutive host ports reserved as one allocation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    /// Host port for game traffic.
    pub game: u16,
    /// Host port for the control channel.
    pub control: u16,
}

impl PortPair {
    /// The pair starting at `game`.
    pub fn starting_at(game: u16) -> Option<Self> {
        Some(Self {
            game,
            control: game.checked_add(1)?,
        })
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.game, self.control)
    }
}

/// Smallest free pair at or above `base` given the published ports `used`.
///
/// Returns `None` only when the port space above `base` is exhausted.
pub fn next_free_port_pair(used: &HashSet<u16>, base: u16) -> Option<PortPair> {
    let mut game = base;
    loop {
        let pair = PortPair::starting_at(game)?;
        if !used.contains(&pair.game) && !used.contains(&pair.control) {
            return Some(pair);
        }
        game = game.checked_add(2)?;
    }
}

/// Computes the next free port pair against a container runtime.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    base: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}

impl PortAllocator {
    /// Allocator handing out pairs from `base` upwards.
    pub fn new(base: u16) -> Self {
        Self { base }
    }

    /// First port of the first pair.
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Query the runtime's published ports and return the first free pair.
    pub async fn next_free_pair(&self, runtime: &dyn ContainerRuntime) -> runtime::Result<PortPair> {
        let used = runtime.published_ports().await?;
        tracing::debug!(used = ?used, base = self.base, "Published ports");
        next_free_port_pair(&used, self.base).ok_or_else(|| {
            runtime::RuntimeError::Other(format!("no free port pair above {}", self.base))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    fn used(ports: &[u16]) -> HashSet<u16> {
        ports.iter().copied().collect()
    }

    #[test]
    fn test_empty_snapshot_returns_base() {
        let pair = next_free_port_pair(&used(&[]), 8001).unwrap();
        assert_eq!(pair, PortPair { game: 8001, control: 8002 });
    }

    #[test]
    fn test_occupied_first_pair_skips_to_second() {
        let pair = next_free_port_pair(&used(&[8001, 8002]), 8001).unwrap();
        assert_eq!(pair, PortPair { game: 8003, control: 8004 });
    }

    #[test]
    fn test_either_port_blocks_the_pair() {
        assert_eq!(next_free_port_pair(&used(&[8002]), 8001).unwrap().game, 8003);
        assert_eq!(next_free_port_pair(&used(&[8001]), 8001).unwrap().game, 8003);
    }

    #[test]
    fn test_gap_is_reused() {
        // first pair freed while later ones are still taken
        let pair = next_free_port_pair(&used(&[8003, 8004, 8005, 8006]), 8001).unwrap();
        assert_eq!(pair.game, 8001);
    }

    #[test]
    fn test_unrelated_ports_are_ignored() {
        let pair = next_free_port_pair(&used(&[80, 443, 5432, 8000]), 8001).unwrap();
        assert_eq!(pair.game, 8001);
    }

    #[test]
    fn test_smallest_free_pair_for_any_snapshot() {
        // brute force over small snapshots of the first three pairs
        let candidates = [8001u16, 8002, 8003, 8004, 8005, 8006];
        for mask in 0u32..(1 << candidates.len()) {
            let snapshot: HashSet<u16> = candidates
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, p)| *p)
                .collect();

            let pair = next_free_port_pair(&snapshot, 8001).unwrap();
            assert!(!snapshot.contains(&pair.game) && !snapshot.contains(&pair.control));
            assert_eq!((pair.game - 8001) % 2, 0);
            let mut k = 8001;
            while k < pair.game {
                assert!(snapshot.contains(&k) || snapshot.contains(&(k + 1)));
                k += 2;
            }
            // same snapshot, same answer
            assert_eq!(next_free_port_pair(&snapshot, 8001), Some(pair));
        }
    }

    #[test]
    fn test_exhausted_port_space() {
        assert_eq!(next_free_port_pair(&used(&[]), u16::MAX), None);
        assert_eq!(next_free_port_pair(&used(&[65533]), 65533), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(PortPair { game: 8001, control: 8002 }.to_string(), "8001/8002");
    }

    #[tokio::test]
    async fn test_allocator_sees_external_containers() {
        let runtime = MockRuntime::new();
        runtime.add_external_container("someone-else", &[8001]).await;

        let pair = PortAllocator::default().next_free_pair(&runtime).await.unwrap();
        assert_eq!(pair, PortPair { game: 8003, control: 8004 });
    }

    #[tokio::test]
    async fn test_allocator_reuses_pair_after_container_exits() {
        let runtime = MockRuntime::new();
        let allocator = PortAllocator::new(8001);
        let id = runtime.add_external_container("server", &[8001, 8002]).await;

        assert_eq!(allocator.next_free_pair(&runtime).await.unwrap().game, 8003);

        runtime.remove_externally(&id).await;
        assert_eq!(allocator.next_free_pair(&runtime).await.unwrap().game, 8001);
    }
}
