//! Periodic and on-demand memory sampling.
//!
//! `start` takes one snapshot immediately and then samples on a dedicated
//! thread until `stop`. The thread waits on a crossbeam channel with a
//! timeout, so `stop` wakes it at once instead of waiting out the interval.
//! Sampling never fails: a failed reading becomes an error-flagged snapshot.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::report::{HeuristicThresholds, MemoryReport, SnapshotComparison};
use super::snapshot::{MemorySnapshot, PoolSummary, SnapshotRing};
use super::source::MemorySource;
use crate::error::PoolError;
use crate::memory::BufferPool;
use crate::telemetry;

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling interval used by `ResourceSession::start_monitoring` when the
    /// caller passes zero.
    pub interval_ms: u64,
    /// Ring capacity. Older snapshots are dropped past this.
    pub max_snapshots: usize,
    /// After each periodic sample, evict idle pool regions until the pool
    /// holds at most this fraction of its maximum size.
    pub pressure_trim_ratio: Option<f64>,
    pub thresholds: HeuristicThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_snapshots: 1000,
            pressure_trim_ratio: None,
            thresholds: HeuristicThresholds::default(),
        }
    }
}

struct SessionInfo {
    id: Uuid,
    context: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl SessionInfo {
    fn new(context: Option<String>) -> Self {
        Self { id: Uuid::new_v4(), context, started_at: Utc::now(), started: Instant::now() }
    }
}

struct Sampler {
    session_id: Uuid,
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

struct MonitorInner {
    config: MonitorConfig,
    source: Box<dyn MemorySource>,
    pool: Option<BufferPool>,
    ring: Mutex<SnapshotRing>,
    session: Mutex<SessionInfo>,
    sampler: Mutex<Option<Sampler>>,
}

impl MonitorInner {
    fn capture(&self, context: Option<&str>) -> MemorySnapshot {
        let elapsed_ms = self.session.lock().started.elapsed().as_millis() as u64;
        let pool = self.pool.as_ref().map(|p| PoolSummary::from(&p.metrics()));
        let context = context.map(str::to_string);
        match self.source.sample() {
            Ok(reading) => {
                telemetry::record_memory_sample(&reading);
                MemorySnapshot {
                    timestamp: Utc::now(),
                    elapsed_ms,
                    total: reading.total,
                    used: reading.used,
                    available: reading.available,
                    pool,
                    context,
                    error: None,
                }
            }
            Err(e) => {
                warn!(source = self.source.name(), error = %e, "memory sample failed");
                MemorySnapshot {
                    timestamp: Utc::now(),
                    elapsed_ms,
                    total: 0,
                    used: 0,
                    available: 0,
                    pool,
                    context,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn record(&self, context: Option<&str>) -> MemorySnapshot {
        let snapshot = self.capture(context);
        self.ring.lock().push(snapshot.clone());
        snapshot
    }

    fn tick(&self) {
        let snapshot = self.record(None);
        debug!(used = snapshot.used, elapsed_ms = snapshot.elapsed_ms, "periodic sample");
        if let (Some(ratio), Some(pool)) = (self.config.pressure_trim_ratio, &self.pool) {
            if pool.metrics().capacity_ratio() > ratio {
                pool.relieve_pressure(ratio);
            }
        }
    }

    fn report(&self) -> MemoryReport {
        let (snapshots, dropped) = {
            let ring = self.ring.lock();
            (ring.to_vec(), ring.dropped())
        };
        let session = self.session.lock();
        MemoryReport::build(
            session.id,
            session.context.clone(),
            session.started_at,
            &snapshots,
            dropped,
            &self.config.thresholds,
        )
    }

    /// Stop the sampling thread if one is running. Returns true if it was.
    fn halt(&self) -> bool {
        let Some(sampler) = self.sampler.lock().take() else {
            return false;
        };
        // Disconnect also wakes the thread, so a failed send is harmless.
        let _ = sampler.stop_tx.send(());
        if sampler.thread.join().is_err() {
            warn!(session_id = %sampler.session_id, "sampling thread panicked");
        }
        true
    }
}

/// Memory usage monitor. Cloning shares the same state.
#[derive(Clone)]
pub struct UsageMonitor {
    inner: Arc<MonitorInner>,
}

impl UsageMonitor {
    pub fn new(config: MonitorConfig, source: Box<dyn MemorySource>) -> Self {
        Self::build(config, source, None)
    }

    /// Monitor whose snapshots carry `pool` figures and which can relieve
    /// pool pressure between samples.
    pub fn with_pool(config: MonitorConfig, source: Box<dyn MemorySource>, pool: BufferPool) -> Self {
        Self::build(config, source, Some(pool))
    }

    fn build(config: MonitorConfig, source: Box<dyn MemorySource>, pool: Option<BufferPool>) -> Self {
        let ring = SnapshotRing::new(config.max_snapshots);
        Self {
            inner: Arc::new(MonitorInner {
                config,
                source,
                pool,
                ring: Mutex::new(ring),
                session: Mutex::new(SessionInfo::new(None)),
                sampler: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Begin a monitoring session.
    ///
    /// Any running session is stopped first and the snapshot ring is
    /// cleared. One snapshot is taken before this returns.
    pub fn start(&self, interval: Duration, context: Option<&str>) -> Result<MonitorHandle, PoolError> {
        if interval.is_zero() {
            return Err(PoolError::InvalidInput("monitor interval must be positive".into()));
        }
        if self.inner.halt() {
            info!("previous monitoring session stopped by restart");
        }

        let session_id = {
            let mut session = self.inner.session.lock();
            *session = SessionInfo::new(context.map(str::to_string));
            session.id
        };
        self.inner.ring.lock().clear();
        self.inner.record(context);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let thread = thread::Builder::new()
            .name("proofpool-monitor".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match weak.upgrade() {
                        Some(inner) => inner.tick(),
                        None => break,
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| PoolError::Sampling(format!("failed to spawn sampling thread: {e}")))?;

        *self.inner.sampler.lock() = Some(Sampler { session_id, stop_tx, thread });
        info!(
            session_id = %session_id,
            interval_ms = interval.as_millis() as u64,
            source = self.inner.source.name(),
            "monitoring started"
        );
        Ok(MonitorHandle { monitor: self.clone(), session_id })
    }

    /// Stop sampling and report on the current session. Calling it again, or
    /// before `start`, returns a report without side effects.
    pub fn stop(&self) -> MemoryReport {
        let was_running = self.inner.halt();
        let report = self.inner.report();
        if was_running {
            info!(session_id = %report.session_id, summary = %report.summary(), "monitoring stopped");
            if report.leak_suspected() {
                warn!(
                    session_id = %report.session_id,
                    net_growth = report.net_growth,
                    "sustained memory growth observed"
                );
            }
        }
        report
    }

    /// Take and record a snapshot now.
    pub fn snapshot(&self, context: Option<&str>) -> MemorySnapshot {
        self.inner.record(context)
    }

    /// Report on the current session without stopping it.
    pub fn report(&self) -> MemoryReport {
        self.inner.report()
    }

    /// Compare two snapshots by ring index.
    pub fn compare(&self, a: usize, b: usize) -> Result<SnapshotComparison, PoolError> {
        let ring = self.inner.ring.lock();
        let count = ring.len();
        let first = ring.get(a).ok_or(PoolError::InvalidSnapshotId { id: a, count })?;
        let second = ring.get(b).ok_or(PoolError::InvalidSnapshotId { id: b, count })?;
        Ok(SnapshotComparison::between((a, first), (b, second), &self.inner.config.thresholds))
    }

    pub fn snapshots(&self) -> Vec<MemorySnapshot> {
        self.inner.ring.lock().to_vec()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.ring.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.sampler.lock().is_some()
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session.lock().id
    }
}

impl std::fmt::Debug for UsageMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageMonitor")
            .field("source", &self.inner.source.name())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Handle to a running monitoring session.
#[derive(Debug)]
pub struct MonitorHandle {
    monitor: UsageMonitor,
    session_id: Uuid,
}

impl MonitorHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running() && self.monitor.session_id() == self.session_id
    }

    /// Stop the session and return its report. If the monitor has since been
    /// restarted, the newer session is left running and its current report
    /// is returned.
    pub fn stop(self) -> MemoryReport {
        if self.monitor.session_id() != self.session_id {
            debug!(session_id = %self.session_id, "stale monitor handle; session already replaced");
            return self.monitor.report();
        }
        self.monitor.stop()
    }
}
