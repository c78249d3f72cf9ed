//! Metric emission through the `metrics` facade.
//!
//! Without an installed recorder every call here is a no-op.

use metrics::{counter, gauge};

use crate::admission::Priority;
use crate::memory::{OverrideReason, PoolMetrics};
use crate::monitor::MemoryReading;

/// Publish pool gauges after a pool mutation.
pub fn record_pool_metrics(m: &PoolMetrics) {
    gauge!("proofpool_pool_bytes", "state" => "active").set(m.overall.active_size as f64);
    gauge!("proofpool_pool_bytes", "state" => "free").set(m.overall.free_size as f64);
    gauge!("proofpool_pool_capacity_ratio").set(m.capacity_ratio());
    gauge!("proofpool_pool_utilization_ratio").set(m.overall.utilization_ratio);
    for (tag, tm) in &m.by_tag {
        gauge!("proofpool_pool_tag_bytes", "tag" => tag.clone()).set(tm.total_size as f64);
    }
}

/// Zero the per-tag gauge of a tag the pool no longer tracks.
pub fn record_tag_retired(tag: &str) {
    gauge!("proofpool_pool_tag_bytes", "tag" => tag.to_string()).set(0.0);
}

pub fn record_acquire(tag: &str, hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("proofpool_acquire_total", "tag" => tag.to_string(), "outcome" => outcome)
        .increment(1);
}

pub fn record_pool_exhausted(tag: &str) {
    counter!("proofpool_pool_exhausted_total", "tag" => tag.to_string()).increment(1);
}

/// Count an availability decision.
pub fn record_admission(priority: Priority, admitted: bool) {
    let outcome = if admitted { "admitted" } else { "denied" };
    counter!(
        "proofpool_admission_total",
        "priority" => priority.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_operation_count(count: usize, usage_mb: u64) {
    gauge!("proofpool_registered_operations").set(count as f64);
    gauge!("proofpool_registered_usage_mb").set(usage_mb as f64);
}

pub fn record_strategy_override(reason: Option<OverrideReason>) {
    let label = match reason {
        Some(OverrideReason::MemoryPressure) => "memory_pressure",
        Some(OverrideReason::CriticalPriority) => "critical_priority",
        None => "none",
    };
    counter!("proofpool_strategy_decisions_total", "override" => label).increment(1);
}

pub fn record_memory_sample(reading: &MemoryReading) {
    gauge!("proofpool_memory_bytes", "kind" => "used").set(reading.used as f64);
    gauge!("proofpool_memory_bytes", "kind" => "available").set(reading.available as f64);
    gauge!("proofpool_memory_bytes", "kind" => "total").set(reading.total as f64);
}
