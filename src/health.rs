//! Health grading for a resource session.
//!
//! Combines pool occupancy, admission accounting and the latest monitor
//! report into a single Healthy / Degraded / Unhealthy verdict for
//! supervisors and dashboards.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::admission::AdmissionUsage;
use crate::memory::PoolMetrics;
use crate::monitor::MemoryReport;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    /// Whether new Medium/Low work can reasonably be admitted.
    pub ready: bool,
    pub pool_total_bytes: usize,
    pub pool_active_bytes: usize,
    /// Active bytes as a fraction of the pool ceiling.
    pub pool_active_ratio: f64,
    pub pool_exhausted_count: u64,
    pub admission_usage_ratio: f64,
    pub registered_operations: usize,
    pub leak_suspected: bool,
    /// Why the state is not Healthy. Empty when it is.
    pub reasons: Vec<String>,
    pub uptime_secs: u64,
}

/// Health check thresholds.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Active pool ratio at which the session is Degraded.
    pub degraded_pool_ratio: f64,
    /// Admission usage ratio at which the session is Degraded.
    pub degraded_usage_ratio: f64,
    /// Admission usage ratio above which the session is Unhealthy.
    pub unhealthy_usage_ratio: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_pool_ratio: 0.9,
            degraded_usage_ratio: 0.8,
            unhealthy_usage_ratio: 1.0,
        }
    }
}

/// Aggregates health information from session components.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Check readiness: room in both the pool and the admission budget.
    pub fn is_ready(&self, pool: &PoolMetrics, admission: &AdmissionUsage) -> bool {
        active_ratio(pool) < 1.0 && admission.usage_ratio < self.config.unhealthy_usage_ratio
    }

    /// Generate full health report.
    pub fn report(
        &self,
        pool: &PoolMetrics,
        admission: &AdmissionUsage,
        last_report: Option<&MemoryReport>,
    ) -> HealthReport {
        let leak_suspected = last_report.is_some_and(MemoryReport::leak_suspected);
        let (state, reasons) = self.compute_state(pool, admission, leak_suspected);

        HealthReport {
            state,
            ready: self.is_ready(pool, admission),
            pool_total_bytes: pool.overall.total_size,
            pool_active_bytes: pool.overall.active_size,
            pool_active_ratio: active_ratio(pool),
            pool_exhausted_count: pool.exhausted_count,
            admission_usage_ratio: admission.usage_ratio,
            registered_operations: admission.operation_count,
            leak_suspected,
            reasons,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(
        &self,
        pool: &PoolMetrics,
        admission: &AdmissionUsage,
        leak_suspected: bool,
    ) -> (HealthState, Vec<String>) {
        let mut reasons = Vec::new();
        let mut state = HealthState::Healthy;

        let pool_ratio = active_ratio(pool);
        if pool_ratio >= 1.0 {
            state = HealthState::Unhealthy;
            reasons.push("pool is fully held by active regions".to_string());
        } else if pool_ratio >= self.config.degraded_pool_ratio {
            state = HealthState::Degraded;
            reasons.push(format!("pool {:.0}% active", pool_ratio * 100.0));
        }

        if admission.usage_ratio > self.config.unhealthy_usage_ratio {
            state = HealthState::Unhealthy;
            reasons.push(format!(
                "admission budget overcommitted ({} of {} MB)",
                admission.current_mb, admission.total_budget_mb
            ));
        } else if admission.usage_ratio >= self.config.degraded_usage_ratio {
            if state == HealthState::Healthy {
                state = HealthState::Degraded;
            }
            reasons.push(format!("admission budget {:.0}% used", admission.usage_ratio * 100.0));
        }

        if leak_suspected {
            if state == HealthState::Healthy {
                state = HealthState::Degraded;
            }
            reasons.push("sustained memory growth in last monitoring session".to_string());
        }

        (state, reasons)
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

fn active_ratio(pool: &PoolMetrics) -> f64 {
    if pool.max_size == 0 {
        return 0.0;
    }
    pool.overall.active_size as f64 / pool.max_size as f64
}
