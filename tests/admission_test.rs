//! TDD-Light tests for admission control.

use proofpool::admission::{AdmissionConfig, OperationKind, Priority, ResourceAdmissionController};
use proofpool::memory::{BufferPool, BufferPoolConfig, OverrideReason, StrategyName};
use proofpool::monitor::{MemoryReading, ScriptedMemorySource};
use proofpool::{ErrorKind, PoolError};

fn controller(total: u64, reserve: u64, threshold: u64) -> ResourceAdmissionController {
    ResourceAdmissionController::new(AdmissionConfig {
        total_budget_mb: total,
        critical_reserve_mb: reserve,
        high_priority_threshold_mb: threshold,
        ..Default::default()
    })
}

#[test]
fn critical_uses_dedicated_reserve() {
    let c = controller(4096, 200, 256);
    assert!(c.register("op1", OperationKind::ProofGeneration, Priority::Critical, 100, None));
    assert!(c.is_available(150, Priority::Critical));
    assert!(!c.is_available(250, Priority::Critical));
}

#[test]
fn critical_admission_is_monotonic() {
    let c = controller(1000, 200, 0);
    assert!(c.register("bulk", OperationKind::Setup, Priority::Low, 1000, None));
    for mb in (0..=200).rev() {
        assert!(c.is_available(mb, Priority::Critical));
    }
    assert!(!c.is_available(201, Priority::Critical));
}

#[test]
fn lower_tiers_never_touch_reserve() {
    let c = controller(1000, 300, 100);
    assert!(c.is_available(700, Priority::Low));
    assert!(!c.is_available(701, Priority::Medium));
    assert!(c.register("a", OperationKind::Verification, Priority::Medium, 650, None));
    assert!(!c.is_available(51, Priority::Low));
    assert!(c.is_available(50, Priority::Low));
}

#[test]
fn high_priority_floor_survives_exhaustion() {
    let c = controller(1000, 300, 100);
    assert!(c.register("hog", OperationKind::ProofGeneration, Priority::Low, 1000, None));
    assert!(!c.is_available(1, Priority::Medium));
    assert!(c.is_available(100, Priority::High));
    assert!(!c.is_available(101, Priority::High));
}

#[test]
fn unregister_unknown_is_false() {
    let c = controller(1000, 0, 0);
    assert!(!c.unregister("ghost"));
    assert!(c.register("real", OperationKind::Setup, Priority::Low, 1, None));
    assert!(c.unregister("real"));
    assert!(!c.unregister("real"));
}

#[test]
fn operations_listed_with_context() {
    let c = controller(1000, 0, 0);
    let ctx = serde_json::json!({"circuit": "merkle", "constraints": 1 << 20});
    assert!(c.register("a", OperationKind::KeyGeneration, Priority::High, 64, Some(ctx)));
    assert!(c.register("b", OperationKind::CryptoOperation, Priority::Low, 8, None));
    let ops = c.operations();
    assert_eq!(ops.len(), 2);
    let a = c.operation("a").unwrap();
    assert_eq!(a.context.unwrap()["circuit"], "merkle");
    let usage = c.usage();
    assert_eq!(usage.current_mb, 72);
    assert_eq!(usage.operation_count, 2);
}

#[test]
fn admit_denial_maps_to_user_message() {
    let c = controller(100, 50, 0);
    let err = c
        .admit("big", OperationKind::ProofGeneration, Priority::Low, 60, None)
        .unwrap_err();
    assert!(matches!(err, PoolError::AdmissionDenied { required_mb: 60, priority: Priority::Low }));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(err.to_string().contains("try a smaller operation or wait"));
    assert_eq!(c.operation_count(), 0);
}

#[test]
fn admit_duplicate_id_is_invalid_input() {
    let c = controller(1000, 0, 0);
    let _first = c.admit("dup", OperationKind::Setup, Priority::Low, 10, None).unwrap();
    let err = c.admit("dup", OperationKind::Setup, Priority::Low, 10, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn ticket_update_changes_accounting() {
    let c = controller(1000, 0, 0);
    let ticket = c.admit("t", OperationKind::Verification, Priority::Medium, 10, None).unwrap();
    assert!(ticket.update_estimate(40));
    assert_eq!(c.current_usage_mb(), 40);
    drop(ticket);
    assert_eq!(c.current_usage_mb(), 0);
}

#[test]
fn auto_optimize_installs_critical_override() {
    let pool = BufferPool::new(BufferPoolConfig::default());
    let c = ResourceAdmissionController::with_pool(
        AdmissionConfig { total_budget_mb: 1000, ..Default::default() },
        pool.clone(),
    );
    let base = c.strategy();
    assert!(c.register("crit", OperationKind::ProofGeneration, Priority::Critical, 10, None));
    assert_eq!(c.override_reason(), Some(OverrideReason::CriticalPriority));
    assert!(pool.profile().batch_size > base.batch_size);

    assert!(c.register("calm", OperationKind::Verification, Priority::Low, 10, None));
    assert_eq!(c.override_reason(), None);
    assert_eq!(pool.profile(), base);
}

#[test]
fn set_strategy_reaches_pool() {
    let pool = BufferPool::new(BufferPoolConfig::default());
    let c = ResourceAdmissionController::with_pool(AdmissionConfig::default(), pool.clone());
    c.set_strategy(StrategyName::HighSecurity);
    assert!(pool.profile().force_secure_wipe);
    assert_eq!(c.strategy().name, StrategyName::HighSecurity);
}

#[test]
fn optimize_unknown_operation_is_invalid() {
    let pool = BufferPool::new(BufferPoolConfig::default());
    let c = ResourceAdmissionController::with_pool(AdmissionConfig::default(), pool);
    assert_eq!(c.optimize("nope").unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn budget_detected_from_source() {
    let source = ScriptedMemorySource::new([MemoryReading::from_mb(8192, 1000)]);
    let config = AdmissionConfig::default().with_detected_budget(&source).unwrap();
    assert_eq!(config.total_budget_mb, 8192);

    let empty = ScriptedMemorySource::new([MemoryReading::default()]);
    assert!(AdmissionConfig::default().with_detected_budget(&empty).is_err());
}

#[test]
fn concurrent_registration_counts_every_operation() {
    let c = controller(1_000_000, 0, 0);
    let workers: Vec<_> = (0..8)
        .map(|t| {
            let c = c.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let id = format!("w{t}-{i}");
                    assert!(c.register(&id, OperationKind::Verification, Priority::Low, 1, None));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(c.operation_count(), 800);
    assert_eq!(c.current_usage_mb(), 800);
}

#[test]
fn huge_estimates_saturate_instead_of_wrapping() {
    let pool = BufferPool::new(BufferPoolConfig::default());
    let c = ResourceAdmissionController::with_pool(
        AdmissionConfig { total_budget_mb: 1000, ..Default::default() },
        pool,
    );
    assert!(c.register("a", OperationKind::Setup, Priority::Low, u64::MAX, None));
    assert!(c.register("b", OperationKind::Setup, Priority::Low, 1, None));

    assert_eq!(c.current_usage_mb(), u64::MAX);
    let usage = c.usage();
    assert_eq!(usage.current_mb, u64::MAX);
    assert_eq!(usage.operation_count, 2);
    assert!(!c.is_available(1, Priority::Medium));
    assert!(!c.is_available(1, Priority::Low));
    assert_eq!(c.override_reason(), Some(OverrideReason::MemoryPressure));
}

#[test]
fn pressure_override_cleared_when_load_falls() {
    let pool = BufferPool::new(BufferPoolConfig::default());
    let c = ResourceAdmissionController::with_pool(
        AdmissionConfig { total_budget_mb: 100, ..Default::default() },
        pool.clone(),
    );
    let base = c.strategy();
    assert!(c.register("small", OperationKind::Verification, Priority::Low, 10, None));
    assert!(c.register("bulk", OperationKind::Setup, Priority::Low, 80, None));
    assert_eq!(c.override_reason(), Some(OverrideReason::MemoryPressure));
    assert_eq!(pool.profile().max_concurrent_ops, 1);

    assert!(c.unregister("bulk"));
    assert_eq!(c.override_reason(), None);
    assert_eq!(pool.profile(), base);
}

#[test]
fn critical_override_survives_unregister() {
    let pool = BufferPool::new(BufferPoolConfig::default());
    let c = ResourceAdmissionController::with_pool(
        AdmissionConfig { total_budget_mb: 1000, ..Default::default() },
        pool,
    );
    assert!(c.register("crit", OperationKind::ProofGeneration, Priority::Critical, 10, None));
    assert!(c.register("other", OperationKind::Verification, Priority::Critical, 10, None));
    assert!(c.unregister("other"));
    assert_eq!(c.override_reason(), Some(OverrideReason::CriticalPriority));
}
