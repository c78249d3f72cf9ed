//! Session configuration from TOML files and `PROOFPOOL_*` environment
//! variables.
//!
//! Every field has a default. Environment values are layered over whatever
//! the file (or the defaults) provided; invalid values are ignored and the
//! previous value kept, without failing. Numeric values are floored or
//! clamped to workable ranges.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `PROOFPOOL_MAX_POOL_SIZE` | 268435456 | Pool ceiling (bytes) |
//! | `PROOFPOOL_SECURE_CLEAR` | true | Wipe on release by default |
//! | `PROOFPOOL_FULL_FLUSH_RATIO` | 0.8 | Trim full-flush threshold |
//! | `PROOFPOOL_TOTAL_BUDGET_MB` | 4096 | Admission budget (MB) |
//! | `PROOFPOOL_CRITICAL_RESERVE_MB` | 512 | Critical reserve (MB) |
//! | `PROOFPOOL_HIGH_PRIORITY_THRESHOLD_MB` | 256 | High-priority floor (MB) |
//! | `PROOFPOOL_AUTO_OPTIMIZE` | true | Optimize on register |
//! | `PROOFPOOL_STRATEGY` | balanced | Active strategy preset |
//! | `PROOFPOOL_MONITOR_INTERVAL_MS` | 1000 | Sampling interval (ms) |
//! | `PROOFPOOL_MAX_SNAPSHOTS` | 1000 | Snapshot ring capacity |

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::admission::AdmissionConfig;
use crate::error::PoolError;
use crate::memory::{BufferPoolConfig, StrategyName, KIB};
use crate::monitor::MonitorConfig;
use crate::telemetry::LogConfig;

const MIN_POOL_SIZE: usize = 64 * KIB;
const MIN_INTERVAL_MS: u64 = 10;
const MAX_SNAPSHOTS_CAP: usize = 1_000_000;

/// Complete configuration for a [`crate::ResourceSession`].
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub pool: BufferPoolConfig,
    pub admission: AdmissionConfig,
    pub monitor: MonitorConfig,
    pub logging: LogConfig,
}

/// Flattened view of the effective values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub max_pool_size: usize,
    pub secure_clear_on_release: bool,
    pub full_flush_ratio: f64,
    pub total_budget_mb: u64,
    pub critical_reserve_mb: u64,
    pub high_priority_threshold_mb: u64,
    pub auto_optimize: bool,
    pub strategy: StrategyName,
    pub monitor_interval_ms: u64,
    pub max_snapshots: usize,
    pub pressure_trim_ratio: Option<f64>,
}

/// Parse a `usize` env var, returning `current` on missing or invalid.
fn parse_usize(key: &str, current: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(current),
        Err(_) => current,
    }
}

/// Parse a `u64` env var, returning `current` on missing or invalid.
fn parse_u64(key: &str, current: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(current),
        Err(_) => current,
    }
}

fn parse_f64(key: &str, current: f64) -> f64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(current),
        Err(_) => current,
    }
}

fn parse_bool(key: &str, current: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => current,
        },
        Err(_) => current,
    }
}

fn parse_strategy(key: &str, current: StrategyName) -> StrategyName {
    match std::env::var(key) {
        Ok(val) => val.parse().unwrap_or(current),
        Err(_) => current,
    }
}

/// Layer `PROOFPOOL_*` variables over `config`.
pub fn apply_env_overrides(mut config: SessionConfig) -> SessionConfig {
    let pool = &mut config.pool;
    pool.max_pool_size = parse_usize("PROOFPOOL_MAX_POOL_SIZE", pool.max_pool_size);
    pool.secure_clear_on_release = parse_bool("PROOFPOOL_SECURE_CLEAR", pool.secure_clear_on_release);
    pool.full_flush_ratio = parse_f64("PROOFPOOL_FULL_FLUSH_RATIO", pool.full_flush_ratio);

    let admission = &mut config.admission;
    admission.total_budget_mb = parse_u64("PROOFPOOL_TOTAL_BUDGET_MB", admission.total_budget_mb);
    admission.critical_reserve_mb =
        parse_u64("PROOFPOOL_CRITICAL_RESERVE_MB", admission.critical_reserve_mb);
    admission.high_priority_threshold_mb =
        parse_u64("PROOFPOOL_HIGH_PRIORITY_THRESHOLD_MB", admission.high_priority_threshold_mb);
    admission.auto_optimize = parse_bool("PROOFPOOL_AUTO_OPTIMIZE", admission.auto_optimize);
    admission.strategy = parse_strategy("PROOFPOOL_STRATEGY", admission.strategy);

    let monitor = &mut config.monitor;
    monitor.interval_ms = parse_u64("PROOFPOOL_MONITOR_INTERVAL_MS", monitor.interval_ms);
    monitor.max_snapshots = parse_usize("PROOFPOOL_MAX_SNAPSHOTS", monitor.max_snapshots);

    config.logging = config.logging.apply_env();
    normalize(config)
}

/// Floors and clamps. Applied to every loaded config.
fn normalize(mut config: SessionConfig) -> SessionConfig {
    config.pool.max_pool_size = config.pool.max_pool_size.max(MIN_POOL_SIZE);
    config.pool.full_flush_ratio = config.pool.full_flush_ratio.clamp(0.0, 1.0);
    config.admission.pressure_threshold = config.admission.pressure_threshold.clamp(0.0, 1.0);
    config.monitor.interval_ms = config.monitor.interval_ms.max(MIN_INTERVAL_MS);
    config.monitor.max_snapshots = config.monitor.max_snapshots.clamp(1, MAX_SNAPSHOTS_CAP);
    config.monitor.pressure_trim_ratio = config.monitor.pressure_trim_ratio.map(|r| r.clamp(0.0, 1.0));
    config
}

/// Defaults plus environment.
///
/// Missing or invalid values fall back to defaults without failing.
pub fn load() -> SessionConfig {
    apply_env_overrides(SessionConfig::default())
}

/// Parse a TOML document. Missing tables and keys take their defaults.
pub fn from_toml_str(text: &str) -> Result<SessionConfig, PoolError> {
    let config: SessionConfig =
        toml::from_str(text).map_err(|e| PoolError::Config(e.to_string()))?;
    Ok(normalize(config))
}

/// Read and parse a TOML file. Environment variables are not applied.
pub fn load_file(path: impl AsRef<Path>) -> Result<SessionConfig, PoolError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| PoolError::Config(format!("{}: {e}", path.display())))?;
    from_toml_str(&text)
}

/// File first, then environment.
pub fn load_with_file(path: impl AsRef<Path>) -> Result<SessionConfig, PoolError> {
    load_file(path).map(apply_env_overrides)
}

impl SessionConfig {
    /// Misconfigurations that are legal but almost certainly unintended.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let a = &self.admission;
        if a.critical_reserve_mb > a.total_budget_mb {
            warnings.push(format!(
                "critical_reserve_mb ({}) exceeds total_budget_mb ({}); Medium and Low operations can never be admitted",
                a.critical_reserve_mb, a.total_budget_mb
            ));
        }
        if a.high_priority_threshold_mb > a.total_budget_mb {
            warnings.push(format!(
                "high_priority_threshold_mb ({}) exceeds total_budget_mb ({})",
                a.high_priority_threshold_mb, a.total_budget_mb
            ));
        }
        if a.total_budget_mb == 0 {
            warnings.push("total_budget_mb is 0; only Critical and small High operations can be admitted".into());
        }
        let pool_mb = (self.pool.max_pool_size / (1024 * KIB)) as u64;
        if a.total_budget_mb > 0 && pool_mb > a.total_budget_mb {
            warnings.push(format!(
                "max_pool_size ({pool_mb} MB) exceeds the admission budget ({} MB)",
                a.total_budget_mb
            ));
        }
        if self.pool.full_flush_ratio <= 0.0 {
            warnings.push("full_flush_ratio is 0; every trim drops all idle regions".into());
        }
        if !self.pool.secure_clear_on_release && a.strategy != StrategyName::HighSecurity {
            warnings.push("secure_clear_on_release is off; released buffers keep their contents until reuse".into());
        }
        if let Some(ratio) = self.monitor.pressure_trim_ratio {
            if ratio <= 0.0 {
                warnings.push("pressure_trim_ratio is 0; every periodic sample evicts all idle regions".into());
            }
        }
        warnings
    }

    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            max_pool_size: self.pool.max_pool_size,
            secure_clear_on_release: self.pool.secure_clear_on_release,
            full_flush_ratio: self.pool.full_flush_ratio,
            total_budget_mb: self.admission.total_budget_mb,
            critical_reserve_mb: self.admission.critical_reserve_mb,
            high_priority_threshold_mb: self.admission.high_priority_threshold_mb,
            auto_optimize: self.admission.auto_optimize,
            strategy: self.admission.strategy,
            monitor_interval_ms: self.monitor.interval_ms,
            max_snapshots: self.monitor.max_snapshots,
            pressure_trim_ratio: self.monitor.pressure_trim_ratio,
        }
    }
}
