//! proofpool
//!
//! Memory management for cryptographic proof workloads: witness buffers,
//! constraint tables, proof blobs, verification keys and public inputs.
//! These buffers are large, short-lived, come in predictable size bands and
//! hold sensitive data that must be destroyed deterministically.
//!
//! # Components
//!
//! - **memory**: size classification, the size-classed [`BufferPool`] with
//!   secure release, pool metrics and strategy presets
//! - **admission**: per-operation memory accounting and priority-tiered
//!   admission decisions
//! - **monitor**: periodic and on-demand sampling with growth and spike
//!   heuristics
//!
//! # Lifecycle
//!
//! acquire → track → release-and-wipe → evict-under-pressure → diagnose.
//! A [`ResourceSession`] owns one of each component; there are no
//! process-wide instances.

pub mod admission;
pub mod config;
pub mod error;
pub mod health;
pub mod memory;
pub mod monitor;
pub mod telemetry;

use std::time::Duration;

use tracing::info;

pub use admission::{
    AdmissionConfig, AdmissionTicket, OperationKind, Priority, ResourceAdmissionController,
};
pub use config::SessionConfig;
pub use error::{ErrorKind, PoolError};
pub use health::{HealthChecker, HealthReport, HealthState};
pub use memory::{BufferPool, BufferPoolConfig, Region, SizeCategory, StrategyName};
pub use monitor::{MemoryReport, MemorySource, MonitorHandle, UsageMonitor};

use monitor::PoolMemorySource;

/// A pool, admission controller and monitor wired together for one
/// proof-pipeline session.
pub struct ResourceSession {
    pub pool: BufferPool,
    pub admission: ResourceAdmissionController,
    pub monitor: UsageMonitor,
    health: HealthChecker,
    config: SessionConfig,
}

impl ResourceSession {
    /// Session whose monitor samples the pool's own accounting.
    pub fn new(config: SessionConfig) -> Self {
        let pool = BufferPool::new(config.pool.clone());
        let source = Box::new(PoolMemorySource::new(&pool));
        Self::assemble(config, pool, source)
    }

    /// Session whose monitor samples `source`, e.g. procfs.
    pub fn with_source(config: SessionConfig, source: Box<dyn MemorySource>) -> Self {
        let pool = BufferPool::new(config.pool.clone());
        Self::assemble(config, pool, source)
    }

    fn assemble(config: SessionConfig, pool: BufferPool, source: Box<dyn MemorySource>) -> Self {
        for warning in config.validate() {
            tracing::warn!(%warning, "session configuration");
        }
        let admission = ResourceAdmissionController::with_pool(config.admission.clone(), pool.clone());
        let monitor = UsageMonitor::with_pool(config.monitor.clone(), source, pool.clone());
        info!(
            pool_id = pool.id(),
            max_pool_size = config.pool.max_pool_size,
            total_budget_mb = config.admission.total_budget_mb,
            strategy = %config.admission.strategy,
            "resource session created"
        );
        Self {
            pool,
            admission,
            monitor,
            health: HealthChecker::default(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn acquire(&self, size: usize, purpose_tag: &str) -> Result<Region, PoolError> {
        self.pool.acquire(size, purpose_tag)
    }

    /// Release with the configured default wipe setting.
    pub fn release(&self, region: Region) {
        self.pool.release(region)
    }

    pub fn release_with(&self, region: Region, secure_wipe: bool) {
        self.pool.release_with(region, secure_wipe)
    }

    pub fn register_operation(
        &self,
        id: &str,
        kind: OperationKind,
        priority: Priority,
        estimated_memory_mb: u64,
        context: Option<serde_json::Value>,
    ) -> bool {
        self.admission.register(id, kind, priority, estimated_memory_mb, context)
    }

    pub fn unregister_operation(&self, id: &str) -> bool {
        self.admission.unregister(id)
    }

    pub fn is_memory_available(&self, required_mb: u64, priority: Priority) -> bool {
        self.admission.is_available(required_mb, priority)
    }

    pub fn admit(
        &self,
        id: &str,
        kind: OperationKind,
        priority: Priority,
        estimated_memory_mb: u64,
        context: Option<serde_json::Value>,
    ) -> Result<AdmissionTicket, PoolError> {
        self.admission.admit(id, kind, priority, estimated_memory_mb, context)
    }

    /// Start sampling. An interval of zero uses the configured interval.
    pub fn start_monitoring(&self, interval_ms: u64, context: Option<&str>) -> Result<MonitorHandle, PoolError> {
        let interval_ms = if interval_ms == 0 { self.config.monitor.interval_ms } else { interval_ms };
        self.monitor.start(Duration::from_millis(interval_ms), context)
    }

    pub fn stop_monitoring(&self) -> MemoryReport {
        self.monitor.stop()
    }

    pub fn health(&self) -> HealthReport {
        let report = self.monitor.report();
        self.health.report(&self.pool.metrics(), &self.admission.usage(), Some(&report))
    }
}

impl Default for ResourceSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
