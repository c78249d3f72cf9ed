//! Pool metrics.
//!
//! [`PoolMetrics`] is a derived view: the pool rebuilds it from its free
//! lists, active set and event counters after every acquire, release, trim
//! and reset. It is never consulted for allocation decisions.

use std::collections::BTreeMap;

use serde::Serialize;

/// Usage figures for one purpose tag, or the aggregate across tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagMetrics {
    /// Bytes held by the pool for this tag (active + free).
    pub total_size: usize,
    /// Bytes currently handed out to callers.
    pub active_size: usize,
    /// Bytes sitting idle in free lists.
    pub free_size: usize,
    /// Successful acquires (hits + misses).
    pub allocation_count: u64,
    /// Acquires served from a free list.
    pub hit_count: u64,
    /// Acquires that required fresh memory.
    pub miss_count: u64,
    /// Releases accepted back into a free list or destroyed.
    pub release_count: u64,
    /// Idle regions evicted by trim or pressure relief.
    pub eviction_count: u64,
    pub active_regions: usize,
    pub free_regions: usize,
    /// `active_size / total_size`, or 0.0 for an empty pool.
    pub utilization_ratio: f64,
}

impl TagMetrics {
    /// Fraction of acquires served by reuse.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            return 0.0;
        }
        self.hit_count as f64 / total as f64
    }

    pub(crate) fn finish(&mut self) {
        self.total_size = self.active_size + self.free_size;
        self.utilization_ratio = if self.total_size == 0 {
            0.0
        } else {
            self.active_size as f64 / self.total_size as f64
        };
    }

    pub(crate) fn accumulate(&mut self, other: &TagMetrics) {
        self.active_size += other.active_size;
        self.free_size += other.free_size;
        self.allocation_count += other.allocation_count;
        self.hit_count += other.hit_count;
        self.miss_count += other.miss_count;
        self.release_count += other.release_count;
        self.eviction_count += other.eviction_count;
        self.active_regions += other.active_regions;
        self.free_regions += other.free_regions;
    }
}

/// Snapshot of pool usage, per tag plus the synthesized "overall" aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub overall: TagMetrics,
    pub by_tag: BTreeMap<String, TagMetrics>,
    /// Configured ceiling in bytes.
    pub max_size: usize,
    /// Number of destructive resets so far.
    pub resets: u64,
    /// Acquires rejected because the pool could not make room.
    pub exhausted_count: u64,
}

impl PoolMetrics {
    /// Metrics for a single tag, if that tag has ever been used.
    pub fn tag(&self, tag: &str) -> Option<&TagMetrics> {
        self.by_tag.get(tag)
    }

    /// `overall.total_size / max_size`.
    pub fn capacity_ratio(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.overall.total_size as f64 / self.max_size as f64
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Pool: {}/{} KiB held ({} KiB active, {} KiB idle), {} hits / {} misses ({:.1}% reuse), {} evictions",
            self.overall.total_size / 1024,
            self.max_size / 1024,
            self.overall.active_size / 1024,
            self.overall.free_size / 1024,
            self.overall.hit_count,
            self.overall.miss_count,
            self.overall.hit_ratio() * 100.0,
            self.overall.eviction_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio_empty() {
        assert_eq!(TagMetrics::default().hit_ratio(), 0.0);
    }

    #[test]
    fn test_finish_computes_utilization() {
        let mut m = TagMetrics { active_size: 300, free_size: 100, ..Default::default() };
        m.finish();
        assert_eq!(m.total_size, 400);
        assert!((m.utilization_ratio - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_mentions_reuse() {
        let mut metrics = PoolMetrics { max_size: 1024 * 1024, ..Default::default() };
        metrics.overall.hit_count = 3;
        metrics.overall.miss_count = 1;
        assert!(metrics.summary().contains("75.0% reuse"));
    }
}
