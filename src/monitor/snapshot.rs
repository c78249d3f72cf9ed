//! Point-in-time memory snapshots and the bounded ring that holds them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::memory::PoolMetrics;

/// Pool figures carried by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolSummary {
    pub total_size: usize,
    pub active_size: usize,
    pub free_size: usize,
    pub hit_ratio: f64,
    pub utilization_ratio: f64,
}

impl From<&PoolMetrics> for PoolSummary {
    fn from(m: &PoolMetrics) -> Self {
        Self {
            total_size: m.overall.total_size,
            active_size: m.overall.active_size,
            free_size: m.overall.free_size,
            hit_ratio: m.overall.hit_ratio(),
            utilization_ratio: m.overall.utilization_ratio,
        }
    }
}

/// Immutable memory record. A failed sample still yields a snapshot, with
/// zeroed readings and `error` set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySnapshot {
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the monitoring session started.
    pub elapsed_ms: u64,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub pool: Option<PoolSummary>,
    pub context: Option<String>,
    pub error: Option<String>,
}

impl MemorySnapshot {
    /// True when the reading failed and the memory figures are not real.
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

/// Fixed-capacity snapshot store. Oldest entries are dropped once full.
#[derive(Debug)]
pub struct SnapshotRing {
    entries: VecDeque<MemorySnapshot>,
    capacity: usize,
    dropped: u64,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, snapshot: MemorySnapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(snapshot);
    }

    pub fn get(&self, index: usize) -> Option<&MemorySnapshot> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshots discarded because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemorySnapshot> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<MemorySnapshot> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(used: u64) -> MemorySnapshot {
        MemorySnapshot {
            timestamp: Utc::now(),
            elapsed_ms: 0,
            total: 100,
            used,
            available: 100 - used,
            pool: None,
            context: None,
            error: None,
        }
    }

    #[test]
    fn test_ring_drops_oldest_past_capacity() {
        let mut ring = SnapshotRing::new(3);
        for used in 1..=5 {
            ring.push(snap(used));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.dropped(), 2);
        assert_eq!(ring.get(0).unwrap().used, 3);
        assert_eq!(ring.get(2).unwrap().used, 5);
    }

    #[test]
    fn test_ring_keeps_all_below_capacity() {
        let mut ring = SnapshotRing::new(1000);
        for used in 0..10 {
            ring.push(snap(used));
        }
        assert_eq!(ring.len(), 10);
        assert_eq!(ring.dropped(), 0);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut ring = SnapshotRing::new(0);
        ring.push(snap(1));
        ring.push(snap(2));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.get(0).unwrap().used, 2);
    }
}
