//! Memory usage monitoring: sources, snapshots, reports and the sampling
//! monitor.

mod report;
mod snapshot;
mod source;
mod usage;

pub use report::{HeuristicThresholds, MemoryReport, SnapshotComparison, Spike};
pub use snapshot::{MemorySnapshot, PoolSummary, SnapshotRing};
pub use source::{
    system_page_size, MemoryReading, MemorySource, PoolMemorySource, ProcMemorySource,
    ScriptedMemorySource,
};
pub use usage::{MonitorConfig, MonitorHandle, UsageMonitor};
