//! Shared state the arbitration loop publishes and the HTTP surface reads.

use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::core::node::NodeLike;

/// The arbitrator's view of the world, updated once per loop iteration and
/// read concurrently by the HTTP handlers. Reads never block writers for
/// longer than a field copy: the loop only holds the write lock to swap in
/// a freshly built seed/view pair, never across a network call.
pub struct ArbitratorState<N: NodeLike> {
    inner: RwLock<Inner<N>>,
    start_time: Instant,
}

struct Inner<N: NodeLike> {
    seed: N,
    last_view: Vec<N>,
    loops: u64,
    partitions: u64,
}

impl<N: NodeLike> ArbitratorState<N> {
    pub fn new(seed: N) -> Self {
        Self {
            inner: RwLock::new(Inner {
                seed,
                last_view: Vec::new(),
                loops: 0,
                partitions: 0,
            }),
            start_time: Instant::now(),
        }
    }

    /// Replaces the current seed and last known membership view, and bumps
    /// the loop counter. Called once per arbitration loop iteration (step
    /// (a)): the loop always publishes whatever `SeedNode`/`LastView` it is
    /// carrying at the top of the tick, so a seed change made partway
    /// through one iteration becomes visible at the start of the next.
    pub fn publish(&self, seed: N, view: Vec<N>) {
        let mut inner = self.inner.write();
        inner.seed = seed;
        inner.last_view = view;
        inner.loops += 1;
    }

    pub fn record_partition(&self) {
        self.inner.write().partitions += 1;
    }

    pub fn loops(&self) -> u64 {
        self.inner.read().loops
    }

    pub fn partitions(&self) -> u64 {
        self.inner.read().partitions
    }

    pub fn snapshot(&self) -> StatsSnapshot<N>
    where
        N: Clone,
    {
        let inner = self.inner.read();
        StatsSnapshot {
            start_time: self.start_time,
            uptime: self.start_time.elapsed(),
            loops: inner.loops,
            partitions: inner.partitions,
            seed: inner.seed.clone(),
            last_view: inner.last_view.clone(),
        }
    }
}

/// An immutable, point-in-time copy of `ArbitratorState` for serialization.
/// `start_time` is a process-local `Instant` and is rendered by the caller
/// (the HTTP layer converts it to a wall-clock RFC1123 timestamp using the
/// process start time it captured separately).
pub struct StatsSnapshot<N> {
    pub start_time: Instant,
    pub uptime: std::time::Duration,
    pub loops: u64,
    pub partitions: u64,
    pub seed: N,
    pub last_view: Vec<N>,
}

impl<N: Serialize> Serialize for StatsSnapshot<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Uptime", &humantime::format_duration(self.uptime).to_string())?;
        map.serialize_entry("Loops", &self.loops)?;
        map.serialize_entry("Partitions", &self.partitions)?;
        map.serialize_entry("Current Seed Node", &self.seed)?;
        map.serialize_entry("Last Membership View", &self.last_view)?;
        map.end()
    }
}
