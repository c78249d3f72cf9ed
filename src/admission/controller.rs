//! Admission control for proof-system operations.
//!
//! Tracks registered operations and their estimated memory, decides whether a
//! new request fits the configured budgets for its priority tier, and tunes
//! the pool's strategy profile as load changes.
//!
//! Critical work draws only on the dedicated reserve. Medium and Low work
//! always has the reserve subtracted from what it may use, so lower tiers
//! can never consume it.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Span};

use super::operation::{Operation, OperationKind, Priority};
use crate::error::PoolError;
use crate::memory::{BufferPool, OverrideReason, StrategyName, StrategyProfile, StrategySet, MIB};
use crate::monitor::MemorySource;
use crate::telemetry::{self, log_security_event, OperationSpan, SecurityEvent};

/// Budgets for admission decisions, in whole megabytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Memory available to all registered operations together.
    pub total_budget_mb: u64,
    /// Carved out for Critical operations and never available to lower tiers.
    pub critical_reserve_mb: u64,
    /// High-priority requests up to this size are admitted even when the
    /// remaining budget is exhausted.
    pub high_priority_threshold_mb: u64,
    /// Run `optimize` after every successful `register`.
    pub auto_optimize: bool,
    /// Usage ratio above which `optimize` installs the aggressive profile.
    pub pressure_threshold: f64,
    /// Preset active at construction.
    pub strategy: StrategyName,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            total_budget_mb: 4096,
            critical_reserve_mb: 512,
            high_priority_threshold_mb: 256,
            auto_optimize: true,
            pressure_threshold: 0.8,
            strategy: StrategyName::default(),
        }
    }
}

impl AdmissionConfig {
    /// Replace `total_budget_mb` with the total memory reported by `source`.
    pub fn with_detected_budget(mut self, source: &dyn MemorySource) -> Result<Self, PoolError> {
        let reading = source.sample()?;
        let detected = reading.total / MIB as u64;
        if detected == 0 {
            return Err(PoolError::Sampling(format!(
                "{} reported no total memory",
                source.name()
            )));
        }
        info!(source = source.name(), total_budget_mb = detected, "admission budget detected");
        self.total_budget_mb = detected;
        Ok(self)
    }
}

/// Aggregate accounting across registered operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionUsage {
    pub current_mb: u64,
    pub total_budget_mb: u64,
    pub critical_reserve_mb: u64,
    /// `current_mb / total_budget_mb`.
    pub usage_ratio: f64,
    pub operation_count: usize,
}

/// Outcome of an `optimize` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyDecision {
    pub operation_id: String,
    /// `None` when the active preset is in force without an override.
    pub reason: Option<OverrideReason>,
    pub profile: StrategyProfile,
    pub usage_ratio: f64,
}

struct ControllerInner {
    config: AdmissionConfig,
    operations: DashMap<String, Operation>,
    strategies: RwLock<StrategySet>,
    pool: Option<BufferPool>,
}

/// Thread-safe admission controller. Cloning shares the same state.
#[derive(Clone)]
pub struct ResourceAdmissionController {
    inner: Arc<ControllerInner>,
}

impl ResourceAdmissionController {
    /// Controller without a pool. Admission decisions work; `optimize` fails
    /// with `NotInitialized`.
    pub fn new(config: AdmissionConfig) -> Self {
        Self::build(config, None)
    }

    /// Controller that applies strategy decisions to `pool`.
    pub fn with_pool(config: AdmissionConfig, pool: BufferPool) -> Self {
        Self::build(config, Some(pool))
    }

    fn build(config: AdmissionConfig, pool: Option<BufferPool>) -> Self {
        let strategies = StrategySet::new(config.strategy);
        if let Some(pool) = &pool {
            pool.apply_profile(strategies.effective());
        }
        Self {
            inner: Arc::new(ControllerInner {
                config,
                operations: DashMap::new(),
                strategies: RwLock::new(strategies),
                pool,
            }),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    /// Register an operation. Returns false (and logs) on an empty or
    /// duplicate id or a zero estimate.
    pub fn register(
        &self,
        id: &str,
        kind: OperationKind,
        priority: Priority,
        estimated_memory_mb: u64,
        context: Option<serde_json::Value>,
    ) -> bool {
        if id.trim().is_empty() {
            warn!("operation registration rejected: empty id");
            return false;
        }
        if estimated_memory_mb == 0 {
            warn!(operation_id = id, "operation registration rejected: estimate must be positive");
            return false;
        }

        match self.inner.operations.entry(id.to_string()) {
            Entry::Occupied(_) => {
                warn!(operation_id = id, "operation registration rejected: duplicate id");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(Operation {
                    id: id.to_string(),
                    kind,
                    priority,
                    estimated_memory_mb,
                    registered_at: Utc::now(),
                    context,
                });
            }
        }

        let usage = self.usage();
        telemetry::record_operation_count(usage.operation_count, usage.current_mb);
        info!(
            operation_id = id,
            kind = %kind,
            priority = %priority,
            estimated_memory_mb,
            current_mb = usage.current_mb,
            "operation registered"
        );

        if self.inner.config.auto_optimize && self.inner.pool.is_some() {
            if let Err(e) = self.optimize(id) {
                warn!(operation_id = id, error = %e, "automatic strategy optimization failed");
            }
        }
        true
    }

    /// Remove an operation. Returns false for an unknown id.
    pub fn unregister(&self, id: &str) -> bool {
        match self.inner.operations.remove(id) {
            Some((_, op)) => {
                let usage = self.usage();
                telemetry::record_operation_count(usage.operation_count, usage.current_mb);
                debug!(
                    operation_id = id,
                    held_ms = (Utc::now() - op.registered_at).num_milliseconds(),
                    "operation unregistered"
                );
                self.relax_pressure_override(&usage);
                true
            }
            None => {
                warn!(operation_id = id, "unregister of unknown operation ignored");
                false
            }
        }
    }

    /// Replace an operation's estimate. Returns false for an unknown id or a
    /// zero estimate.
    pub fn update_estimate(&self, id: &str, estimated_memory_mb: u64) -> bool {
        if estimated_memory_mb == 0 {
            warn!(operation_id = id, "estimate update rejected: estimate must be positive");
            return false;
        }
        match self.inner.operations.get_mut(id) {
            Some(mut op) => {
                debug!(
                    operation_id = id,
                    from_mb = op.estimated_memory_mb,
                    to_mb = estimated_memory_mb,
                    "operation estimate updated"
                );
                op.estimated_memory_mb = estimated_memory_mb;
                true
            }
            None => {
                warn!(operation_id = id, "estimate update for unknown operation ignored");
                false
            }
        }
    }

    /// Sum of estimates across registered operations.
    pub fn current_usage_mb(&self) -> u64 {
        self.inner
            .operations
            .iter()
            .map(|op| op.estimated_memory_mb)
            .fold(0u64, u64::saturating_add)
    }

    /// Whether `required_mb` may be admitted at `priority`.
    pub fn is_available(&self, required_mb: u64, priority: Priority) -> bool {
        let config = &self.inner.config;
        let usage = self.current_usage_mb();
        let remaining = config.total_budget_mb.saturating_sub(usage);
        let admitted = match priority {
            Priority::Critical => required_mb <= config.critical_reserve_mb,
            Priority::High => {
                required_mb <= remaining || required_mb <= config.high_priority_threshold_mb
            }
            Priority::Medium | Priority::Low => {
                required_mb <= remaining.saturating_sub(config.critical_reserve_mb)
            }
        };
        telemetry::record_admission(priority, admitted);
        debug!(required_mb, priority = %priority, current_mb = usage, admitted, "availability check");
        admitted
    }

    /// Check availability and register in one step.
    ///
    /// The returned ticket unregisters the operation when dropped. The check
    /// and the registration are not atomic with respect to other callers.
    pub fn admit(
        &self,
        id: &str,
        kind: OperationKind,
        priority: Priority,
        estimated_memory_mb: u64,
        context: Option<serde_json::Value>,
    ) -> Result<AdmissionTicket, PoolError> {
        if !self.is_available(estimated_memory_mb, priority) {
            log_security_event(
                SecurityEvent::AdmissionDenied,
                "Operation refused by admission control",
                &[
                    ("operation_id", id),
                    ("priority", priority.as_str()),
                    ("required_mb", estimated_memory_mb.to_string().as_str()),
                ],
            );
            return Err(PoolError::AdmissionDenied { required_mb: estimated_memory_mb, priority });
        }
        if !self.register(id, kind, priority, estimated_memory_mb, context) {
            return Err(PoolError::InvalidInput(format!(
                "operation '{id}' could not be registered"
            )));
        }
        if priority == Priority::Critical {
            info!(operation_id = id, estimated_memory_mb, "critical reserve in use");
        }
        Ok(AdmissionTicket {
            id: id.to_string(),
            span: OperationSpan::new(id, kind, priority, estimated_memory_mb),
            controller: self.clone(),
        })
    }

    /// Pick a strategy override for the current load and apply it to the pool.
    ///
    /// Usage above `pressure_threshold` installs the aggressive variant of the
    /// active preset. Otherwise a Critical operation installs the
    /// performance-biased variant. Otherwise any override is cleared.
    pub fn optimize(&self, id: &str) -> Result<StrategyDecision, PoolError> {
        let priority = self
            .inner
            .operations
            .get(id)
            .map(|op| op.priority)
            .ok_or_else(|| PoolError::InvalidInput(format!("unknown operation '{id}'")))?;

        let Some(pool) = &self.inner.pool else {
            error!(operation_id = id, "optimize called on a controller without a pool");
            return Err(PoolError::NotInitialized("no buffer pool attached to controller".into()));
        };

        let usage = self.usage();
        let mut strategies = self.inner.strategies.write();
        let base = strategies.preset(strategies.active_name());
        let reason = if usage.usage_ratio > self.inner.config.pressure_threshold {
            strategies.apply_override(OverrideReason::MemoryPressure, base.aggressive());
            Some(OverrideReason::MemoryPressure)
        } else if priority == Priority::Critical {
            strategies.apply_override(OverrideReason::CriticalPriority, base.performance_biased());
            Some(OverrideReason::CriticalPriority)
        } else {
            strategies.clear_override();
            None
        };
        let profile = strategies.effective();
        drop(strategies);

        pool.apply_profile(profile.clone());
        telemetry::record_strategy_override(reason);
        debug!(
            operation_id = id,
            reason = ?reason,
            usage_ratio = usage.usage_ratio,
            max_concurrent_ops = profile.max_concurrent_ops,
            batch_size = profile.batch_size,
            "strategy optimized"
        );

        Ok(StrategyDecision {
            operation_id: id.to_string(),
            reason,
            profile,
            usage_ratio: usage.usage_ratio,
        })
    }

    /// Drop a memory-pressure override once usage is back at or under
    /// `pressure_threshold`.
    fn relax_pressure_override(&self, usage: &AdmissionUsage) {
        if usage.usage_ratio > self.inner.config.pressure_threshold {
            return;
        }
        let Some(pool) = &self.inner.pool else {
            return;
        };
        let profile = {
            let mut strategies = self.inner.strategies.write();
            if strategies.override_reason() != Some(OverrideReason::MemoryPressure) {
                return;
            }
            strategies.clear_override();
            strategies.effective()
        };
        pool.apply_profile(profile);
        telemetry::record_strategy_override(None);
        info!(usage_ratio = usage.usage_ratio, "memory pressure override cleared");
    }

    /// Select a different preset. Clears any override.
    pub fn set_strategy(&self, name: StrategyName) {
        let profile = {
            let mut strategies = self.inner.strategies.write();
            strategies.set_active(name);
            strategies.effective()
        };
        if profile.force_secure_wipe {
            log_security_event(
                SecurityEvent::ForcedWipeEnabled,
                "Strategy forces secure wipe on every release",
                &[("strategy", name.as_str())],
            );
        }
        if let Some(pool) = &self.inner.pool {
            pool.apply_profile(profile);
        }
        info!(strategy = %name, "strategy selected");
    }

    /// Profile currently in force.
    pub fn strategy(&self) -> StrategyProfile {
        self.inner.strategies.read().effective()
    }

    pub fn override_reason(&self) -> Option<OverrideReason> {
        self.inner.strategies.read().override_reason()
    }

    pub fn usage(&self) -> AdmissionUsage {
        let config = &self.inner.config;
        let (current_mb, operation_count) = self
            .inner
            .operations
            .iter()
            .fold((0u64, 0usize), |(mb, n), op| (mb.saturating_add(op.estimated_memory_mb), n + 1));
        let usage_ratio = if config.total_budget_mb == 0 {
            if current_mb > 0 { 1.0 } else { 0.0 }
        } else {
            current_mb as f64 / config.total_budget_mb as f64
        };
        AdmissionUsage {
            current_mb,
            total_budget_mb: config.total_budget_mb,
            critical_reserve_mb: config.critical_reserve_mb,
            usage_ratio,
            operation_count,
        }
    }

    pub fn operation(&self, id: &str) -> Option<Operation> {
        self.inner.operations.get(id).map(|op| op.clone())
    }

    /// Registered operations, oldest first.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> =
            self.inner.operations.iter().map(|op| op.value().clone()).collect();
        ops.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        ops
    }

    pub fn operation_count(&self) -> usize {
        self.inner.operations.len()
    }
}

/// RAII registration returned by [`ResourceAdmissionController::admit`].
pub struct AdmissionTicket {
    id: String,
    span: Span,
    controller: ResourceAdmissionController,
}

impl AdmissionTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Span covering the operation; enter it around the operation's work.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn update_estimate(&self, estimated_memory_mb: u64) -> bool {
        self.controller.update_estimate(&self.id, estimated_memory_mb)
    }
}

impl std::fmt::Debug for AdmissionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionTicket").field("id", &self.id).finish()
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.controller.unregister(&self.id);
    }
}
