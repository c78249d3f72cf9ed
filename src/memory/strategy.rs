//! Named optimization presets consumed by the pool and admission controller.
//!
//! A [`StrategySet`] holds the four presets, the operator-selected active one,
//! and an optional advisory override installed by the admission controller.
//! Overrides tune concurrency, batching and idle retention; they never change
//! correctness of acquire/release.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Preset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyName {
    LowMemory,
    HighPerformance,
    HighSecurity,
    Balanced,
}

impl Default for StrategyName {
    fn default() -> Self {
        Self::Balanced
    }
}

impl StrategyName {
    pub const ALL: [StrategyName; 4] = [
        StrategyName::LowMemory,
        StrategyName::HighPerformance,
        StrategyName::HighSecurity,
        StrategyName::Balanced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowMemory => "low-memory",
            Self::HighPerformance => "high-performance",
            Self::HighSecurity => "high-security",
            Self::Balanced => "balanced",
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyName {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "low-memory" => Ok(Self::LowMemory),
            "high-performance" => Ok(Self::HighPerformance),
            "high-security" => Ok(Self::HighSecurity),
            "balanced" => Ok(Self::Balanced),
            other => Err(PoolError::InvalidInput(format!("unknown strategy '{other}'"))),
        }
    }
}

/// Tunables a preset applies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyProfile {
    pub name: StrategyName,
    /// Advisory cap on concurrently running operations.
    pub max_concurrent_ops: usize,
    /// Advisory batch size for callers that chunk their work.
    pub batch_size: usize,
    /// Idle (free-list) memory retained on release, as a fraction of the
    /// pool's maximum size. Anything above is evicted oldest-first.
    pub retain_free_ratio: f64,
    /// Wipe every released region regardless of the caller's flag.
    pub force_secure_wipe: bool,
}

impl StrategyProfile {
    /// Built-in preset values.
    pub fn preset(name: StrategyName) -> Self {
        let cpus = num_cpus::get().max(1);
        match name {
            StrategyName::LowMemory => Self {
                name,
                max_concurrent_ops: 1,
                batch_size: 4,
                retain_free_ratio: 0.1,
                force_secure_wipe: false,
            },
            StrategyName::HighPerformance => Self {
                name,
                max_concurrent_ops: cpus,
                batch_size: 64,
                retain_free_ratio: 1.0,
                force_secure_wipe: false,
            },
            StrategyName::HighSecurity => Self {
                name,
                max_concurrent_ops: 2.min(cpus),
                batch_size: 8,
                retain_free_ratio: 0.25,
                force_secure_wipe: true,
            },
            StrategyName::Balanced => Self {
                name,
                max_concurrent_ops: (cpus / 2).max(2),
                batch_size: 16,
                retain_free_ratio: 0.5,
                force_secure_wipe: false,
            },
        }
    }

    /// Memory-pressure variant: one operation at a time, half-size batches,
    /// and no more idle retention than the low-memory preset.
    pub fn aggressive(&self) -> Self {
        let low = Self::preset(StrategyName::LowMemory);
        Self {
            name: self.name,
            max_concurrent_ops: 1,
            batch_size: (self.batch_size / 2).max(1),
            retain_free_ratio: self.retain_free_ratio.min(low.retain_free_ratio),
            force_secure_wipe: self.force_secure_wipe,
        }
    }

    /// Critical-work variant: more concurrency and bigger batches.
    pub fn performance_biased(&self) -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            name: self.name,
            max_concurrent_ops: (self.max_concurrent_ops * 2).max(cpus),
            batch_size: self.batch_size * 2,
            retain_free_ratio: self.retain_free_ratio,
            force_secure_wipe: self.force_secure_wipe,
        }
    }
}

/// Why an override is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    MemoryPressure,
    CriticalPriority,
}

#[derive(Debug, Clone)]
struct StrategyOverride {
    reason: OverrideReason,
    profile: StrategyProfile,
}

/// The preset table plus active selection and optional override.
#[derive(Debug, Clone)]
pub struct StrategySet {
    presets: HashMap<StrategyName, StrategyProfile>,
    active: StrategyName,
    current_override: Option<StrategyOverride>,
}

impl StrategySet {
    pub fn new(active: StrategyName) -> Self {
        let presets = StrategyName::ALL
            .iter()
            .map(|&name| (name, StrategyProfile::preset(name)))
            .collect();
        Self { presets, active, current_override: None }
    }

    pub fn preset(&self, name: StrategyName) -> StrategyProfile {
        self.presets
            .get(&name)
            .cloned()
            .unwrap_or_else(|| StrategyProfile::preset(name))
    }

    pub fn active_name(&self) -> StrategyName {
        self.active
    }

    /// Select a different preset. Clears any override.
    pub fn set_active(&mut self, name: StrategyName) {
        self.active = name;
        self.current_override = None;
    }

    /// Profile currently in force: the override if any, else the active preset.
    pub fn effective(&self) -> StrategyProfile {
        match &self.current_override {
            Some(o) => o.profile.clone(),
            None => self.preset(self.active),
        }
    }

    pub fn apply_override(&mut self, reason: OverrideReason, profile: StrategyProfile) {
        self.current_override = Some(StrategyOverride { reason, profile });
    }

    pub fn clear_override(&mut self) {
        self.current_override = None;
    }

    pub fn override_reason(&self) -> Option<OverrideReason> {
        self.current_override.as_ref().map(|o| o.reason)
    }
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::new(StrategyName::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("low-memory".parse::<StrategyName>().unwrap(), StrategyName::LowMemory);
        assert_eq!("HIGH_SECURITY".parse::<StrategyName>().unwrap(), StrategyName::HighSecurity);
        assert!("fastest".parse::<StrategyName>().is_err());
    }

    #[test]
    fn test_high_security_forces_wipe() {
        assert!(StrategyProfile::preset(StrategyName::HighSecurity).force_secure_wipe);
        assert!(!StrategyProfile::preset(StrategyName::Balanced).force_secure_wipe);
    }

    #[test]
    fn test_aggressive_serializes_and_keeps_wipe() {
        let secure = StrategyProfile::preset(StrategyName::HighSecurity);
        let aggressive = secure.aggressive();
        assert_eq!(aggressive.max_concurrent_ops, 1);
        assert!(aggressive.batch_size <= secure.batch_size);
        assert!(aggressive.force_secure_wipe);
    }

    #[test]
    fn test_performance_biased_grows() {
        let balanced = StrategyProfile::preset(StrategyName::Balanced);
        let fast = balanced.performance_biased();
        assert!(fast.max_concurrent_ops > balanced.max_concurrent_ops);
        assert!(fast.batch_size > balanced.batch_size);
    }

    #[test]
    fn test_override_lifecycle() {
        let mut set = StrategySet::default();
        assert_eq!(set.effective().name, StrategyName::Balanced);
        let profile = set.effective().aggressive();
        set.apply_override(OverrideReason::MemoryPressure, profile.clone());
        assert_eq!(set.override_reason(), Some(OverrideReason::MemoryPressure));
        assert_eq!(set.effective(), profile);
        set.set_active(StrategyName::LowMemory);
        assert!(set.override_reason().is_none());
        assert_eq!(set.effective().name, StrategyName::LowMemory);
    }
}
