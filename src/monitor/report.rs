//! Monitoring reports and triage heuristics.
//!
//! The growth and spike flags are heuristics for a human looking at a run.
//! They do not prove or rule out a leak.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::{MemorySnapshot, PoolSummary};
use crate::memory::MIB;

/// Thresholds for the growth and spike heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicThresholds {
    /// Minimum net growth for sustained growth, in bytes.
    pub growth_bytes: u64,
    /// Fraction of sampled steps that must be increasing.
    pub monotonic_ratio: f64,
    /// Points in the evenly spaced subsequence used for the monotonic check.
    pub sample_points: usize,
    /// A spike's step must exceed this multiple of the mean step.
    pub spike_factor: f64,
    /// A spike's step must also exceed this many bytes.
    pub spike_min_bytes: u64,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            growth_bytes: 10 * MIB as u64,
            monotonic_ratio: 0.8,
            sample_points: 10,
            spike_factor: 5.0,
            spike_min_bytes: 5 * MIB as u64,
        }
    }
}

/// A single upward step flagged as a spike.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spike {
    /// Index of the snapshot after the step.
    pub index: usize,
    pub delta_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Summary of one monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReport {
    pub session_id: Uuid,
    pub context: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sample_count: usize,
    /// Snapshots whose reading failed. Excluded from every figure below.
    pub failed_samples: usize,
    /// Snapshots discarded because the ring was full.
    pub dropped_samples: u64,
    pub peak_used: u64,
    pub average_used: u64,
    /// `last.used - first.used`.
    pub net_growth: i64,
    /// Fraction of increasing steps in the evenly spaced subsequence.
    pub monotonic_ratio: f64,
    pub sustained_growth: bool,
    /// Mean absolute step between consecutive snapshots.
    pub mean_step_bytes: f64,
    pub spikes: Vec<Spike>,
    pub final_pool: Option<PoolSummary>,
}

impl MemoryReport {
    pub(crate) fn build(
        session_id: Uuid,
        context: Option<String>,
        started_at: DateTime<Utc>,
        snapshots: &[MemorySnapshot],
        dropped_samples: u64,
        thresholds: &HeuristicThresholds,
    ) -> Self {
        let valid: Vec<&MemorySnapshot> = snapshots.iter().filter(|s| !s.is_partial()).collect();
        let used: Vec<u64> = valid.iter().map(|s| s.used).collect();

        let peak_used = used.iter().copied().max().unwrap_or(0);
        let average_used = if used.is_empty() {
            0
        } else {
            (used.iter().map(|&u| u as u128).sum::<u128>() / used.len() as u128) as u64
        };
        let net_growth = match (used.first(), used.last()) {
            (Some(&first), Some(&last)) => last as i64 - first as i64,
            _ => 0,
        };

        let monotonic_ratio = monotonic_ratio(&used, thresholds.sample_points);
        let sustained_growth = net_growth >= thresholds.growth_bytes as i64
            && monotonic_ratio >= thresholds.monotonic_ratio;

        let steps: Vec<i64> = used.windows(2).map(|w| w[1] as i64 - w[0] as i64).collect();
        let mean_step_bytes = if steps.is_empty() {
            0.0
        } else {
            steps.iter().map(|d| d.unsigned_abs() as f64).sum::<f64>() / steps.len() as f64
        };
        let spikes = steps
            .iter()
            .enumerate()
            .filter(|&(_, &d)| {
                d > 0
                    && d as f64 > thresholds.spike_factor * mean_step_bytes
                    && d as u64 > thresholds.spike_min_bytes
            })
            .map(|(i, &d)| Spike {
                index: i + 1,
                delta_bytes: d as u64,
                timestamp: valid[i + 1].timestamp,
            })
            .collect();

        Self {
            session_id,
            context,
            started_at,
            finished_at: Utc::now(),
            sample_count: snapshots.len(),
            failed_samples: snapshots.len() - valid.len(),
            dropped_samples,
            peak_used,
            average_used,
            net_growth,
            monotonic_ratio,
            sustained_growth,
            mean_step_bytes,
            spikes,
            final_pool: snapshots.iter().rev().find_map(|s| s.pool),
        }
    }

    /// Growth heuristic fired.
    pub fn leak_suspected(&self) -> bool {
        self.sustained_growth
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn summary(&self) -> String {
        let mb = MIB as f64;
        format!(
            "{} samples: peak {:.1} MB, average {:.1} MB, growth {:+.1} MB, {} spike(s){}",
            self.sample_count,
            self.peak_used as f64 / mb,
            self.average_used as f64 / mb,
            self.net_growth as f64 / mb,
            self.spikes.len(),
            if self.sustained_growth { ", sustained growth" } else { "" },
        )
    }
}

/// Fraction of increasing steps across `points` evenly spaced samples.
fn monotonic_ratio(used: &[u64], points: usize) -> f64 {
    if used.len() < 2 || points < 2 {
        return 0.0;
    }
    let points = points.min(used.len());
    let last = used.len() - 1;
    let picked: Vec<u64> = (0..points).map(|i| used[i * last / (points - 1)]).collect();
    let increasing = picked.windows(2).filter(|w| w[1] > w[0]).count();
    increasing as f64 / (points - 1) as f64
}

/// Difference between two snapshots of the same session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotComparison {
    pub from: usize,
    pub to: usize,
    pub elapsed_ms: i64,
    pub used_before: u64,
    pub used_after: u64,
    pub memory_delta: i64,
    /// `1 - pooled_active / used` at the later snapshot, when it carries pool
    /// figures and a non-zero reading.
    pub fragmentation_ratio: Option<f64>,
    pub recommendations: Vec<String>,
}

impl SnapshotComparison {
    pub(crate) fn between(
        (from, a): (usize, &MemorySnapshot),
        (to, b): (usize, &MemorySnapshot),
        thresholds: &HeuristicThresholds,
    ) -> Self {
        let memory_delta = b.used as i64 - a.used as i64;
        let fragmentation_ratio = match (&b.pool, b.used) {
            (Some(pool), used) if used > 0 => {
                Some((1.0 - pool.active_size as f64 / used as f64).clamp(0.0, 1.0))
            }
            _ => None,
        };

        let mut recommendations = Vec::new();
        if a.is_partial() || b.is_partial() {
            recommendations.push("One of the snapshots failed to sample; figures are incomplete".to_string());
        }
        if memory_delta >= thresholds.growth_bytes as i64 {
            recommendations.push(format!(
                "Memory grew by {:.1} MB; check for buffers that are acquired but never released",
                memory_delta as f64 / MIB as f64
            ));
        }
        if fragmentation_ratio.is_some_and(|f| f > 0.5) {
            recommendations.push(
                "Most used memory is not held by active pool regions; trim idle buffers or use a lower-retention strategy"
                    .to_string(),
            );
        }
        if let Some(pool) = &b.pool {
            if pool.hit_ratio < 0.5 && pool.total_size > 0 {
                recommendations.push(
                    "Low buffer reuse; request consistent sizes per purpose tag so regions can be reused"
                        .to_string(),
                );
            }
        }
        if recommendations.is_empty() {
            recommendations.push("No action needed".to_string());
        }

        Self {
            from,
            to,
            elapsed_ms: (b.timestamp - a.timestamp).num_milliseconds(),
            used_before: a.used,
            used_after: b.used,
            memory_delta,
            fragmentation_ratio,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snaps(used_mb: &[u64]) -> Vec<MemorySnapshot> {
        used_mb
            .iter()
            .enumerate()
            .map(|(i, &mb)| MemorySnapshot {
                timestamp: Utc::now(),
                elapsed_ms: i as u64 * 100,
                total: 1024 * MIB as u64,
                used: mb * MIB as u64,
                available: (1024 - mb) * MIB as u64,
                pool: None,
                context: None,
                error: None,
            })
            .collect()
    }

    fn report(used_mb: &[u64]) -> MemoryReport {
        MemoryReport::build(
            Uuid::new_v4(),
            None,
            Utc::now(),
            &snaps(used_mb),
            0,
            &HeuristicThresholds::default(),
        )
    }

    #[test]
    fn test_steady_growth_is_flagged() {
        let r = report(&[100, 102, 104, 106, 108, 110, 112, 114, 116, 118, 120]);
        assert_eq!(r.net_growth, 20 * MIB as i64);
        assert!(r.sustained_growth);
        assert!(r.spikes.is_empty());
    }

    #[test]
    fn test_growth_below_threshold_not_flagged() {
        let r = report(&[100, 101, 102, 103, 104, 105]);
        assert!(!r.sustained_growth);
    }

    #[test]
    fn test_sawtooth_not_sustained() {
        let r = report(&[100, 130, 100, 130, 100, 130, 100, 130, 100, 130, 120]);
        assert!(r.net_growth >= 10 * MIB as i64);
        assert!(!r.sustained_growth);
    }

    #[test]
    fn test_single_spike_detected() {
        let r = report(&[100, 100, 101, 100, 101, 100, 160, 160, 161, 160]);
        assert_eq!(r.spikes.len(), 1);
        assert_eq!(r.spikes[0].index, 6);
        assert_eq!(r.spikes[0].delta_bytes, 60 * MIB as u64);
    }

    #[test]
    fn test_failed_samples_excluded() {
        let mut s = snaps(&[100, 200]);
        s[1].error = Some("offline".into());
        s[1].used = 0;
        let r = MemoryReport::build(Uuid::new_v4(), None, Utc::now(), &s, 0, &HeuristicThresholds::default());
        assert_eq!(r.failed_samples, 1);
        assert_eq!(r.peak_used, 100 * MIB as u64);
        assert_eq!(r.net_growth, 0);
    }

    #[test]
    fn test_empty_report() {
        let r = report(&[]);
        assert_eq!(r.sample_count, 0);
        assert_eq!(r.peak_used, 0);
        assert!(!r.leak_suspected());
    }

    #[test]
    fn test_report_json_export() {
        let r = report(&[10, 20]);
        let json: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();
        assert_eq!(json["sample_count"], 2);
        assert_eq!(json["session_id"], r.session_id.to_string());
    }

    #[test]
    fn test_monotonic_ratio_subsampling() {
        let used: Vec<u64> = (0..100).collect();
        assert_eq!(monotonic_ratio(&used, 10), 1.0);
        assert_eq!(monotonic_ratio(&[5, 5, 5], 10), 0.0);
        assert_eq!(monotonic_ratio(&[1], 10), 0.0);
    }

    #[test]
    fn test_comparison_fragmentation() {
        let mut s = snaps(&[10, 40]);
        s[1].pool = Some(PoolSummary {
            total_size: 20 * MIB,
            active_size: 10 * MIB,
            free_size: 10 * MIB,
            hit_ratio: 0.9,
            utilization_ratio: 0.5,
        });
        let c = SnapshotComparison::between((0, &s[0]), (1, &s[1]), &HeuristicThresholds::default());
        assert_eq!(c.memory_delta, 30 * MIB as i64);
        let frag = c.fragmentation_ratio.unwrap();
        assert!((frag - 0.75).abs() < 1e-9);
        assert!(c.recommendations.iter().any(|r| r.contains("grew by 30.0 MB")));
    }
}
