//! TDD-Light tests for the size-classed buffer pool.

use proofpool::memory::{
    BufferPool, BufferPoolConfig, SizeCategory, StrategyName, StrategyProfile, TrimMode, KIB, MIB,
};
use proofpool::{ErrorKind, PoolError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn pool(max: usize) -> BufferPool {
    BufferPool::with_profile(
        BufferPoolConfig { max_pool_size: max, ..Default::default() },
        StrategyProfile::preset(StrategyName::HighPerformance),
    )
}

#[test]
fn acquire_rounds_to_size_class() {
    let pool = pool(MIB);
    let region = pool.acquire(5000, "witness").unwrap();
    assert_eq!(region.size(), 8 * KIB);
    assert_eq!(region.category(), SizeCategory::Small);
    assert_eq!(region.purpose_tag(), "witness");
    assert!(region.is_in_use());
}

#[test]
fn acquire_zero_is_invalid() {
    let pool = pool(MIB);
    let err = pool.acquire(0, "witness").unwrap_err();
    assert!(matches!(err, PoolError::InvalidSize(0)));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn release_then_acquire_reuses_same_buffer() {
    let pool = pool(MIB);
    let region = pool.acquire(5000, "witness").unwrap();
    let (id, ptr) = (region.id(), region.as_ptr());
    pool.release(region);

    let again = pool.acquire(5000, "witness").unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(again.as_ptr(), ptr);

    let metrics = pool.metrics();
    let witness = metrics.tag("witness").unwrap();
    assert_eq!(witness.hit_count, 1);
    assert_eq!(witness.miss_count, 1);
    assert_eq!(witness.allocation_count, 2);
}

#[test]
fn secure_release_zeroes_before_reuse() {
    let pool = pool(MIB);
    let mut region = pool.acquire(4096, "key").unwrap();
    region.as_mut_slice().fill(0xAB);
    pool.release_with(region, true);

    let reused = pool.acquire(4000, "key").unwrap();
    assert_eq!(pool.metrics().overall.hit_count, 1);
    assert!(reused.as_slice().iter().all(|&b| b == 0));
}

#[test]
fn high_security_profile_wipes_even_when_caller_declines() {
    let pool = BufferPool::with_profile(
        BufferPoolConfig { max_pool_size: MIB, ..Default::default() },
        StrategyProfile::preset(StrategyName::HighSecurity),
    );
    let mut region = pool.acquire(2048, "proof").unwrap();
    region.as_mut_slice().fill(0x5A);
    pool.release_with(region, false);

    let reused = pool.acquire(2048, "proof").unwrap();
    assert!(reused.as_slice().iter().all(|&b| b == 0));
}

#[test]
fn category_change_is_a_miss() {
    let pool = pool(MIB);
    let tiny = pool.acquire(10, "w").unwrap();
    assert_eq!(tiny.category(), SizeCategory::Tiny);
    pool.release(tiny);

    let small = pool.acquire(3000, "w").unwrap();
    assert_eq!(small.category(), SizeCategory::Small);
    let metrics = pool.metrics();
    assert_eq!(metrics.overall.hit_count, 0);
    assert_eq!(metrics.overall.miss_count, 2);
}

#[test]
fn larger_tiny_request_misses_smaller_free_region() {
    let pool = pool(MIB);
    let first = pool.acquire(10, "w").unwrap();
    assert_eq!(first.size(), 256);
    pool.release(first);

    let second = pool.acquire(300, "w").unwrap();
    assert_eq!(second.size(), 512);
    assert_eq!(pool.metrics().overall.miss_count, 2);
}

#[test]
fn tags_do_not_share_buffers() {
    let pool = pool(MIB);
    let proof = pool.acquire(4096, "proof").unwrap();
    pool.release(proof);
    let _witness = pool.acquire(4096, "witness").unwrap();
    assert_eq!(pool.metrics().overall.hit_count, 0);
    assert_eq!(pool.metrics().by_tag.len(), 2);
}

#[test]
fn second_large_acquire_cannot_evict_active_memory() {
    let pool = pool(MIB);
    let first = pool.acquire(900 * KIB, "x").unwrap();
    let err = pool.acquire(900 * KIB, "x").unwrap_err();
    assert!(matches!(err, PoolError::ResourceExhausted { requested, .. } if requested == 960 * KIB));
    assert!(err.is_retryable());
    assert_eq!(pool.active_size(), first.size());
}

#[test]
fn trim_never_touches_active_regions() {
    let pool = pool(64 * KIB);
    let held: Vec<_> = (0..4).map(|_| pool.acquire(4 * KIB, "w").unwrap()).collect();
    let idle: Vec<_> = (0..4).map(|_| pool.acquire(4 * KIB, "w").unwrap()).collect();
    for region in idle {
        pool.release(region);
    }
    let active_before = pool.active_size();

    let outcome = pool.trim(60 * KIB);
    assert_eq!(pool.active_size(), active_before);
    assert_eq!(outcome.mode, TrimMode::FullFlush);
    assert_eq!(pool.free_size(), 0);
    assert!(!outcome.fits);
    drop(held);
}

#[test]
fn acquire_trims_idle_memory_to_fit() {
    let pool = pool(64 * KIB);
    let regions: Vec<_> = (0..8).map(|_| pool.acquire(8 * KIB, "a").unwrap()).collect();
    for region in regions {
        pool.release(region);
    }
    assert_eq!(pool.total_size(), 64 * KIB);

    let fresh = pool.acquire(16 * KIB, "b").unwrap();
    assert_eq!(fresh.size(), 16 * KIB);
    assert!(pool.total_size() <= 64 * KIB);
    assert_eq!(pool.metrics().tag("a").unwrap().eviction_count, 2);
}

#[test]
fn total_size_never_exceeds_max() {
    let max = 256 * KIB;
    let pool = pool(max);
    let mut rng = StdRng::seed_from_u64(7);
    let tags = ["witness", "proof", "vk"];
    let mut held = Vec::new();

    for _ in 0..2000 {
        match rng.gen_range(0..10) {
            0..=5 => {
                let size = rng.gen_range(1..=48 * KIB);
                let tag = tags[rng.gen_range(0..tags.len())];
                if let Ok(region) = pool.acquire(size, tag) {
                    held.push(region);
                }
            }
            6..=8 if !held.is_empty() => {
                let region = held.swap_remove(rng.gen_range(0..held.len()));
                pool.release_with(region, rng.gen_bool(0.5));
            }
            _ => {
                let active = pool.active_size();
                pool.trim(rng.gen_range(1..=max));
                assert_eq!(pool.active_size(), active);
            }
        }
        assert!(pool.total_size() <= max);
    }
    drop(held);
    assert_eq!(pool.active_size(), 0);
}

#[test]
fn dropped_region_returns_to_pool() {
    let pool = pool(MIB);
    {
        let _region = pool.acquire(1000, "w").unwrap();
        assert_eq!(pool.active_regions().len(), 1);
    }
    assert!(pool.active_regions().is_empty());
    assert_eq!(pool.free_size(), 1024);
    let again = pool.acquire(1000, "w").unwrap();
    assert_eq!(pool.metrics().overall.hit_count, 1);
    drop(again);
}

#[test]
fn foreign_release_is_ignored() {
    let a = pool(MIB);
    let b = pool(MIB);
    let region = a.acquire(4096, "w").unwrap();

    b.release(region);
    assert_eq!(b.total_size(), 0);
    // The handle was dropped by `b`, which routes it back to `a`.
    assert_eq!(a.active_size(), 0);
    assert_eq!(a.free_size(), 4096);
}

#[test]
fn reset_revokes_outstanding_regions() {
    let pool = pool(MIB);
    let mut held = pool.acquire(4096, "w").unwrap();
    let idle = pool.acquire(4096, "w").unwrap();
    pool.release(idle);

    pool.reset(true);
    assert_eq!(pool.total_size(), 0);
    assert!(pool.active_regions().is_empty());
    assert_eq!(pool.metrics().resets, 1);

    held.as_mut_slice().fill(1);
    pool.release(held);
    assert_eq!(pool.total_size(), 0);
    assert_eq!(pool.free_size(), 0);
}

#[test]
fn relieve_pressure_evicts_to_target() {
    let pool = pool(100 * KIB);
    let regions: Vec<_> = (0..10).map(|_| pool.acquire(8 * KIB, "w").unwrap()).collect();
    for region in regions {
        pool.release(region);
    }
    let outcome = pool.relieve_pressure(0.5);
    assert!(outcome.fits);
    assert!(pool.total_size() <= 50 * KIB);
    assert_eq!(outcome.evicted_regions, 4);
}

#[test]
fn active_regions_report_tag_and_size() {
    let pool = pool(MIB);
    let _a = pool.acquire(100, "pub-inputs").unwrap();
    let _b = pool.acquire(70_000, "constraints").unwrap();
    let active = pool.active_regions();
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|r| r.purpose_tag == "constraints" && r.size == 128 * KIB));
    assert!(active.iter().any(|r| r.purpose_tag == "pub-inputs" && r.category == SizeCategory::Tiny));
}

#[test]
fn metrics_overall_aggregates_tags() {
    let pool = pool(MIB);
    let a = pool.acquire(4096, "a").unwrap();
    let _b = pool.acquire(8192, "b").unwrap();
    pool.release(a);
    let m = pool.metrics();
    assert_eq!(m.overall.total_size, 12 * KIB);
    assert_eq!(m.overall.active_size, 8 * KIB);
    assert_eq!(m.overall.free_size, 4 * KIB);
    assert!((m.overall.utilization_ratio - 8.0 / 12.0).abs() < 1e-9);
    assert_eq!(m.tag("a").unwrap().release_count, 1);
}

#[test]
fn concurrent_acquire_release_keeps_accounting() {
    let pool = pool(4 * MIB);
    let workers: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                for _ in 0..200 {
                    let size = rng.gen_range(1..=64 * KIB);
                    if let Ok(mut region) = pool.acquire(size, if t % 2 == 0 { "even" } else { "odd" }) {
                        region.as_mut_slice()[0] = t as u8;
                        pool.release(region);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(pool.active_size(), 0);
    assert!(pool.total_size() <= 4 * MIB);
}

#[test]
fn default_pool_reuses_large_buffer() {
    // Balanced keeps at most half the pool idle; a lone 640 KiB region in a
    // 1 MiB pool is over that and must still come back on the next acquire.
    let pool = BufferPool::new(BufferPoolConfig { max_pool_size: MIB, ..Default::default() });
    let region = pool.acquire(600 * KIB, "proof").unwrap();
    let (id, ptr) = (region.id(), region.as_ptr());
    pool.release(region);

    let again = pool.acquire(600 * KIB, "proof").unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(again.as_ptr(), ptr);
    let metrics = pool.metrics();
    assert_eq!(metrics.overall.hit_count, 1);
    assert_eq!(metrics.overall.eviction_count, 0);
}

#[test]
fn default_pool_wipes_large_buffer_before_reuse() {
    let pool = BufferPool::new(BufferPoolConfig { max_pool_size: MIB, ..Default::default() });
    let mut region = pool.acquire(600 * KIB, "witness").unwrap();
    region.as_mut_slice().fill(0xC3);
    pool.release_with(region, true);

    let reused = pool.acquire(600 * KIB, "witness").unwrap();
    assert_eq!(pool.metrics().overall.hit_count, 1);
    assert!(reused.as_slice().iter().all(|&b| b == 0));
}

#[test]
fn low_retention_profile_still_reuses_returned_buffer() {
    let pool = BufferPool::with_profile(
        BufferPoolConfig::default(),
        StrategyProfile::preset(StrategyName::Balanced).aggressive(),
    );
    let witness = pool.acquire(32 * MIB, "witness").unwrap();
    let id = witness.id();
    pool.release(witness);
    assert_eq!(pool.acquire(32 * MIB, "witness").unwrap().id(), id);
    assert_eq!(pool.metrics().overall.hit_count, 1);
}

#[test]
fn retention_evicts_older_idle_regions_first() {
    let pool = BufferPool::new(BufferPoolConfig { max_pool_size: MIB, ..Default::default() });
    let a = pool.acquire(384 * KIB, "w").unwrap();
    let b = pool.acquire(384 * KIB, "w").unwrap();
    let b_id = b.id();
    pool.release(a);
    pool.release(b);

    // 768 KiB idle is over the 512 KiB limit: the older region goes.
    assert_eq!(pool.free_size(), 384 * KIB);
    assert_eq!(pool.metrics().overall.eviction_count, 1);
    assert_eq!(pool.acquire(384 * KIB, "w").unwrap().id(), b_id);
}

#[test]
fn per_operation_tags_do_not_accumulate() {
    let pool = pool(MIB);
    for i in 0..50 {
        let region = pool.acquire(2 * KIB, &format!("proof-{i}")).unwrap();
        pool.release(region);
    }
    assert_eq!(pool.metrics().by_tag.len(), 50);

    pool.relieve_pressure(0.0);
    let metrics = pool.metrics();
    assert!(metrics.by_tag.is_empty());
    assert_eq!(metrics.overall.allocation_count, 50);
    assert_eq!(metrics.overall.eviction_count, 50);
}

#[test]
fn failed_acquire_does_not_register_tag() {
    let pool = pool(MIB);
    let _held = pool.acquire(900 * KIB, "x").unwrap();
    assert!(pool.acquire(900 * KIB, "other").is_err());
    let metrics = pool.metrics();
    assert!(metrics.tag("other").is_none());
    assert_eq!(metrics.exhausted_count, 1);
}
