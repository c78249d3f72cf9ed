//! Memory readings consumed by the monitor and admission budget detection.
//!
//! The pool does not define how much memory the device has; that figure comes
//! from a [`MemorySource`]. Three are provided: Linux procfs, the pool's own
//! accounting, and a scripted source for tests and simulations.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PoolError;
use crate::memory::{BufferPool, PoolShared, MIB};

/// One memory reading, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryReading {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl MemoryReading {
    pub fn from_mb(total_mb: u64, used_mb: u64) -> Self {
        let mib = MIB as u64;
        Self {
            total: total_mb * mib,
            used: used_mb * mib,
            available: total_mb.saturating_sub(used_mb) * mib,
        }
    }
}

/// Supplies memory readings. Implementations must be cheap and must not
/// block on anything slower than a local file read.
pub trait MemorySource: Send + Sync {
    fn name(&self) -> &'static str;

    fn sample(&self) -> Result<MemoryReading, PoolError>;
}

/// Device totals from `/proc/meminfo`, process usage from `/proc/self/statm`.
#[derive(Debug, Clone)]
pub struct ProcMemorySource {
    meminfo: PathBuf,
    statm: PathBuf,
    page_size: u64,
}

impl Default for ProcMemorySource {
    fn default() -> Self {
        Self {
            meminfo: PathBuf::from("/proc/meminfo"),
            statm: PathBuf::from("/proc/self/statm"),
            page_size: system_page_size(),
        }
    }
}

const FALLBACK_PAGE_SIZE: u64 = 4096;

/// Kernel page size; statm counts in these units.
#[cfg(unix)]
pub fn system_page_size() -> u64 {
    // SAFETY: sysconf has no preconditions and only reads a constant.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(unix))]
pub fn system_page_size() -> u64 {
    FALLBACK_PAGE_SIZE
}

impl ProcMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from alternate files, e.g. a captured procfs snapshot.
    pub fn with_paths(meminfo: impl Into<PathBuf>, statm: impl Into<PathBuf>, page_size: u64) -> Self {
        Self { meminfo: meminfo.into(), statm: statm.into(), page_size }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}

/// Returns `(MemTotal, MemAvailable)` in bytes.
pub(crate) fn parse_meminfo(text: &str) -> Result<(u64, u64), PoolError> {
    let field = |key: &str| -> Option<u64> {
        text.lines()
            .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    };
    let total = field("MemTotal")
        .ok_or_else(|| PoolError::Sampling("MemTotal missing from meminfo".into()))?;
    let available = field("MemAvailable")
        .or_else(|| field("MemFree"))
        .ok_or_else(|| PoolError::Sampling("MemAvailable missing from meminfo".into()))?;
    Ok((total, available))
}

/// Resident set size in bytes from a statm line.
pub(crate) fn parse_statm_rss(text: &str, page_size: u64) -> Result<u64, PoolError> {
    text.split_whitespace()
        .nth(1)
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * page_size)
        .ok_or_else(|| PoolError::Sampling("malformed statm".into()))
}

impl MemorySource for ProcMemorySource {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn sample(&self) -> Result<MemoryReading, PoolError> {
        let meminfo = std::fs::read_to_string(&self.meminfo)
            .map_err(|e| PoolError::Sampling(format!("{}: {e}", self.meminfo.display())))?;
        let statm = std::fs::read_to_string(&self.statm)
            .map_err(|e| PoolError::Sampling(format!("{}: {e}", self.statm.display())))?;
        let (total, available) = parse_meminfo(&meminfo)?;
        let used = parse_statm_rss(&statm, self.page_size)?;
        Ok(MemoryReading { total, used, available })
    }
}

/// Readings from a pool's own accounting: `total` is the pool ceiling and
/// `used` the bytes the pool holds. Portable, and independent of whatever
/// else the process allocates.
pub struct PoolMemorySource {
    pool: Weak<PoolShared>,
}

impl PoolMemorySource {
    pub fn new(pool: &BufferPool) -> Self {
        Self { pool: pool.downgrade() }
    }
}

impl MemorySource for PoolMemorySource {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn sample(&self) -> Result<MemoryReading, PoolError> {
        let shared = self
            .pool
            .upgrade()
            .ok_or_else(|| PoolError::NotInitialized("sampled pool has been dropped".into()))?;
        let pool = BufferPool::from_shared(shared);
        let total = pool.max_size() as u64;
        let used = pool.total_size() as u64;
        Ok(MemoryReading { total, used, available: total.saturating_sub(used) })
    }
}

/// Replays a fixed sequence of readings. Once exhausted it keeps returning
/// the last successful reading.
#[derive(Default)]
pub struct ScriptedMemorySource {
    queue: Mutex<VecDeque<Result<MemoryReading, String>>>,
    last: Mutex<Option<MemoryReading>>,
}

impl ScriptedMemorySource {
    pub fn new(readings: impl IntoIterator<Item = MemoryReading>) -> Self {
        Self {
            queue: Mutex::new(readings.into_iter().map(Ok).collect()),
            last: Mutex::new(None),
        }
    }

    /// Readings with the given used megabytes against a fixed total.
    pub fn from_used_mb(total_mb: u64, used_mb: &[u64]) -> Self {
        Self::new(used_mb.iter().map(|&used| MemoryReading::from_mb(total_mb, used)))
    }

    pub fn push(&self, reading: MemoryReading) {
        self.queue.lock().push_back(Ok(reading));
    }

    /// Queue a failed sample.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.queue.lock().push_back(Err(message.into()));
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

impl MemorySource for ScriptedMemorySource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn sample(&self) -> Result<MemoryReading, PoolError> {
        match self.queue.lock().pop_front() {
            Some(Ok(reading)) => {
                *self.last.lock() = Some(reading);
                Ok(reading)
            }
            Some(Err(message)) => Err(PoolError::Sampling(message)),
            None => (*self.last.lock())
                .ok_or_else(|| PoolError::Sampling("no scripted readings".into())),
        }
    }
}

impl<S: MemorySource + ?Sized> MemorySource for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn sample(&self) -> Result<MemoryReading, PoolError> {
        (**self).sample()
    }
}
