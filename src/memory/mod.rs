//! Pooled memory for proof-system workloads.
//!
//! Provides size classification, the size-classed buffer pool with secure
//! release, pool metrics and the named strategy presets.

mod pool;
mod region;
mod size_class;
mod stats;
mod strategy;

pub use pool::{ActiveRegionInfo, BufferPool, BufferPoolConfig, TrimMode, TrimOutcome};
pub(crate) use pool::PoolShared;
pub use region::{secure_wipe, Region, RegionId};
pub use size_class::{classify, SizeCategory, SizeClass, KIB, MIB};
pub use stats::{PoolMetrics, TagMetrics};
pub use strategy::{OverrideReason, StrategyName, StrategyProfile, StrategySet};
