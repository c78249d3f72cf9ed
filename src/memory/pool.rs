//! Size-classed buffer pool with secure release.
//!
//! Free regions are partitioned by `(purpose_tag, SizeCategory)`. Acquire
//! reuses the first free region in the matching bucket that is at least the
//! rounded size, otherwise allocates fresh memory of exactly the rounded size.
//! Fresh allocations that would push the pool past `max_pool_size` trigger a
//! trim first; trim only ever evicts idle regions, so a request that cannot
//! fit without touching in-use memory fails with `ResourceExhausted`.
//!
//! Uses parking_lot::Mutex for the pool state. Metrics are rebuilt after each
//! mutation and published behind a RwLock so readers never contend with
//! acquire/release.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::region::{PooledRegion, Region, RegionId};
use super::size_class::{classify, SizeCategory, MIB};
use super::stats::{PoolMetrics, TagMetrics};
use super::strategy::{StrategyName, StrategyProfile};
use crate::error::PoolError;
use crate::telemetry::{self, log_security_event, SecurityEvent};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for the buffer pool. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Ceiling on bytes held by the pool (active + idle).
    pub max_pool_size: usize,
    /// Default for `release` and for regions dropped without release.
    pub secure_clear_on_release: bool,
    /// A trim whose pending allocation exceeds this fraction of
    /// `max_pool_size` drops every idle region at once instead of evicting
    /// LRU-first.
    pub full_flush_ratio: f64,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 256 * MIB,
            secure_clear_on_release: true,
            full_flush_ratio: 0.8,
        }
    }
}

/// Which eviction path a trim took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimMode {
    /// Nothing needed evicting.
    None,
    /// Every idle region was dropped.
    FullFlush,
    /// Idle regions were evicted oldest-first until the target was met.
    Lru,
}

/// Result of a trim or pressure-relief pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrimOutcome {
    pub mode: TrimMode,
    pub evicted_regions: usize,
    pub freed_bytes: usize,
    /// Whether the target now fits.
    pub fits: bool,
}

/// A region currently held by a caller.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRegionInfo {
    pub id: RegionId,
    pub purpose_tag: String,
    pub category: SizeCategory,
    pub size: usize,
    pub held_for: Duration,
}

struct ActiveEntry {
    tag: Arc<str>,
    category: SizeCategory,
    size: usize,
    acquired_at: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
struct TagCounters {
    hits: u64,
    misses: u64,
    releases: u64,
    evictions: u64,
}

impl TagCounters {
    fn absorb(&mut self, other: &TagCounters) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.releases += other.releases;
        self.evictions += other.evictions;
    }
}

#[derive(Default)]
struct TagState {
    free: [Vec<PooledRegion>; 5],
    /// Regions of this tag currently held by callers.
    active: usize,
    counters: TagCounters,
}

impl TagState {
    fn is_idle(&self) -> bool {
        self.active == 0 && self.free.iter().all(Vec::is_empty)
    }
}

struct PoolState {
    tags: HashMap<Arc<str>, TagState>,
    active: HashMap<RegionId, ActiveEntry>,
    free_bytes: usize,
    active_bytes: usize,
    generation: u64,
    next_region_id: RegionId,
    resets: u64,
    exhausted: u64,
    /// Counters of tags pruned after they went idle.
    retired: TagCounters,
    profile: StrategyProfile,
}

impl PoolState {
    fn new(profile: StrategyProfile) -> Self {
        Self {
            tags: HashMap::new(),
            active: HashMap::new(),
            free_bytes: 0,
            active_bytes: 0,
            generation: 0,
            next_region_id: 1,
            resets: 0,
            exhausted: 0,
            retired: TagCounters::default(),
            profile,
        }
    }

    fn total(&self) -> usize {
        self.free_bytes + self.active_bytes
    }

    fn intern(&mut self, tag: &str) -> Arc<str> {
        if let Some((key, _)) = self.tags.get_key_value(tag) {
            return Arc::clone(key);
        }
        let key: Arc<str> = Arc::from(tag);
        self.tags.insert(Arc::clone(&key), TagState::default());
        key
    }

    /// First-fit search within one bucket.
    fn take_first_fit(
        &mut self,
        tag: &str,
        category: SizeCategory,
        min_size: usize,
    ) -> Option<PooledRegion> {
        let bucket = &mut self.tags.get_mut(tag)?.free[category.index()];
        let pos = bucket.iter().position(|r| r.size() >= min_size)?;
        let region = bucket.remove(pos);
        self.free_bytes -= region.size();
        Some(region)
    }

    fn push_free(&mut self, region: PooledRegion) {
        self.free_bytes += region.size();
        let slot = region.category.index();
        self.tags
            .entry(Arc::clone(&region.tag))
            .or_default()
            .free[slot]
            .push(region);
    }

    /// Evict idle regions oldest-first until `done` holds or none remain.
    /// `keep` is never a candidate. Evicted regions are always wiped before
    /// being freed.
    fn evict_lru(
        &mut self,
        keep: Option<RegionId>,
        done: impl Fn(&PoolState) -> bool,
    ) -> (usize, usize) {
        if done(self) {
            return (0, 0);
        }
        let mut candidates: Vec<(Instant, RegionId, Arc<str>, usize)> = Vec::new();
        for (tag, tag_state) in &self.tags {
            for (slot, bucket) in tag_state.free.iter().enumerate() {
                for region in bucket.iter().filter(|r| Some(r.id) != keep) {
                    candidates.push((region.last_used, region.id, Arc::clone(tag), slot));
                }
            }
        }
        candidates.sort_by_key(|(last_used, id, _, _)| (*last_used, *id));

        let (mut count, mut bytes) = (0, 0);
        for (_, id, tag, slot) in candidates {
            if done(self) {
                break;
            }
            let freed = self.tags.get_mut(&tag).and_then(|tag_state| {
                let bucket = &mut tag_state.free[slot];
                let pos = bucket.iter().position(|r| r.id == id)?;
                let mut region = bucket.swap_remove(pos);
                tag_state.counters.evictions += 1;
                region.wipe();
                Some(region.size())
            });
            if let Some(size) = freed {
                self.free_bytes -= size;
                count += 1;
                bytes += size;
            }
        }
        (count, bytes)
    }

    /// Drop every idle region.
    fn flush_free(&mut self, wipe: bool) -> (usize, usize) {
        let (mut count, mut bytes) = (0, 0);
        for tag_state in self.tags.values_mut() {
            for bucket in tag_state.free.iter_mut() {
                for mut region in bucket.drain(..) {
                    if wipe {
                        region.wipe();
                    }
                    tag_state.counters.evictions += 1;
                    count += 1;
                    bytes += region.size();
                }
            }
        }
        self.free_bytes -= bytes;
        (count, bytes)
    }

    fn trim(&mut self, needed: usize, config: &BufferPoolConfig) -> TrimOutcome {
        let max = config.max_pool_size;
        let fits = |s: &PoolState| s.total().saturating_add(needed) <= max;
        if fits(self) {
            return TrimOutcome { mode: TrimMode::None, evicted_regions: 0, freed_bytes: 0, fits: true };
        }
        let full_flush = needed as f64 > config.full_flush_ratio * max as f64;
        let (mode, (evicted_regions, freed_bytes)) = if full_flush {
            (TrimMode::FullFlush, self.flush_free(true))
        } else {
            (TrimMode::Lru, self.evict_lru(None, fits))
        };
        TrimOutcome { mode, evicted_regions, freed_bytes, fits: fits(self) }
    }

    /// Evict older idle regions while idle memory exceeds the profile's
    /// retention limit. `just_released` stays pooled even when it alone is
    /// over the limit, so an immediate re-acquire of the same size is a hit.
    fn enforce_retention(&mut self, max: usize, just_released: RegionId) {
        let limit = (self.profile.retain_free_ratio.clamp(0.0, 1.0) * max as f64) as usize;
        if self.free_bytes > limit {
            let (count, bytes) = self.evict_lru(Some(just_released), |s| s.free_bytes <= limit);
            debug!(evicted = count, freed_bytes = bytes, limit, "retention limit enforced");
        }
    }

    /// Drop bookkeeping for tags with no free and no active regions. Their
    /// counters move into the pool-wide retired totals.
    fn prune_idle_tags(&mut self) {
        let retired = &mut self.retired;
        self.tags.retain(|tag, tag_state| {
            if !tag_state.is_idle() {
                return true;
            }
            retired.absorb(&tag_state.counters);
            telemetry::record_tag_retired(tag);
            false
        });
    }

    fn metrics(&self, max_size: usize) -> PoolMetrics {
        let mut by_tag: std::collections::BTreeMap<String, TagMetrics> = self
            .tags
            .iter()
            .map(|(tag, s)| {
                let m = TagMetrics {
                    free_size: s.free.iter().flatten().map(PooledRegion::size).sum(),
                    free_regions: s.free.iter().map(Vec::len).sum(),
                    allocation_count: s.counters.hits + s.counters.misses,
                    hit_count: s.counters.hits,
                    miss_count: s.counters.misses,
                    release_count: s.counters.releases,
                    eviction_count: s.counters.evictions,
                    ..Default::default()
                };
                (tag.to_string(), m)
            })
            .collect();
        for entry in self.active.values() {
            let m = by_tag.entry(entry.tag.to_string()).or_default();
            m.active_size += entry.size;
            m.active_regions += 1;
        }
        let mut overall = TagMetrics::default();
        for m in by_tag.values_mut() {
            m.finish();
            overall.accumulate(m);
        }
        overall.allocation_count += self.retired.hits + self.retired.misses;
        overall.hit_count += self.retired.hits;
        overall.miss_count += self.retired.misses;
        overall.release_count += self.retired.releases;
        overall.eviction_count += self.retired.evictions;
        overall.finish();
        PoolMetrics {
            overall,
            by_tag,
            max_size,
            resets: self.resets,
            exhausted_count: self.exhausted,
        }
    }
}

pub(crate) struct PoolShared {
    id: u64,
    config: BufferPoolConfig,
    state: Mutex<PoolState>,
    published: RwLock<Arc<PoolMetrics>>,
}

impl PoolShared {
    fn publish(&self, metrics: PoolMetrics) {
        telemetry::record_pool_metrics(&metrics);
        *self.published.write() = Arc::new(metrics);
    }

    /// Take a region's bytes back. Regions that are not in this pool's active
    /// set (revoked by a reset, or unknown) are wiped and freed.
    pub(crate) fn check_in(
        &self,
        mut region: PooledRegion,
        pool_id: u64,
        generation: u64,
        secure_wipe: bool,
    ) {
        let mut state = self.state.lock();
        let tracked = pool_id == self.id
            && generation == state.generation
            && state.active.contains_key(&region.id);
        if !tracked {
            let revoked = pool_id == self.id && generation != state.generation;
            drop(state);
            region.wipe();
            if revoked {
                warn!(pool_id = self.id, region_id = region.id, "region returned after reset; destroyed");
                log_security_event(
                    SecurityEvent::RevokedRelease,
                    "Region released after pool reset",
                    &[("region_id", region.id.to_string().as_str()), ("tag", &*region.tag)],
                );
            } else {
                warn!(pool_id = self.id, region_id = region.id, "release of untracked region ignored");
            }
            return;
        }

        if let Some(entry) = state.active.remove(&region.id) {
            state.active_bytes -= entry.size;
        }
        let wipe = secure_wipe || state.profile.force_secure_wipe;
        if wipe {
            region.wipe();
        }
        region.in_use = false;
        region.last_used = Instant::now();
        if let Some(tag_state) = state.tags.get_mut(&*region.tag) {
            tag_state.counters.releases += 1;
            tag_state.active = tag_state.active.saturating_sub(1);
        }
        debug!(
            pool_id = self.id,
            region_id = region.id,
            size = region.size(),
            tag = %region.tag,
            wiped = wipe,
            "region released"
        );
        let region_id = region.id;
        state.push_free(region);
        state.enforce_retention(self.config.max_pool_size, region_id);
        state.prune_idle_tags();

        let metrics = state.metrics(self.config.max_pool_size);
        drop(state);
        self.publish(metrics);
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let id = self.id;
        let wipe = self.config.secure_clear_on_release;
        let state = self.state.get_mut();
        if cfg!(debug_assertions) {
            for (region_id, entry) in &state.active {
                warn!(
                    pool_id = id,
                    region_id,
                    tag = %entry.tag,
                    size = entry.size,
                    held_ms = entry.acquired_at.elapsed().as_millis() as u64,
                    "pool dropped while region still in use"
                );
            }
        }
        if wipe {
            state.flush_free(true);
        }
    }
}

/// Thread-safe size-classed buffer pool.
///
/// Cloning is cheap and shares the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(config: BufferPoolConfig) -> Self {
        Self::with_profile(config, StrategyProfile::preset(StrategyName::default()))
    }

    pub fn with_profile(config: BufferPoolConfig, profile: StrategyProfile) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let initial = PoolMetrics { max_size: config.max_pool_size, ..Default::default() };
        info!(pool_id = id, max_pool_size = config.max_pool_size, strategy = %profile.name, "buffer pool created");
        Self {
            shared: Arc::new(PoolShared {
                id,
                config,
                state: Mutex::new(PoolState::new(profile)),
                published: RwLock::new(Arc::new(initial)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.shared.config
    }

    pub fn max_size(&self) -> usize {
        self.shared.config.max_pool_size
    }

    /// Acquire a buffer of at least `size` bytes for `purpose_tag`.
    pub fn acquire(&self, size: usize, purpose_tag: &str) -> Result<Region, PoolError> {
        let class = classify(size)?;
        if purpose_tag.trim().is_empty() {
            return Err(PoolError::InvalidInput("purpose tag must not be empty".into()));
        }
        let config = &self.shared.config;
        let max = config.max_pool_size;

        let mut state = self.shared.state.lock();
        if class.rounded_size > max {
            state.exhausted += 1;
            let available = max.saturating_sub(state.total());
            drop(state);
            telemetry::record_pool_exhausted(purpose_tag);
            return Err(PoolError::ResourceExhausted { requested: class.rounded_size, available });
        }

        let tag = state.intern(purpose_tag);
        let (mut region, hit) =
            match state.take_first_fit(&tag, class.category, class.rounded_size) {
                Some(region) => (region, true),
                None => {
                    if state.total() + class.rounded_size > max {
                        let outcome = state.trim(class.rounded_size, config);
                        debug!(
                            pool_id = self.shared.id,
                            needed = class.rounded_size,
                            mode = ?outcome.mode,
                            evicted = outcome.evicted_regions,
                            freed_bytes = outcome.freed_bytes,
                            "trim before allocation"
                        );
                        if !outcome.fits {
                            state.exhausted += 1;
                            state.prune_idle_tags();
                            let available = max.saturating_sub(state.total());
                            let metrics = state.metrics(max);
                            drop(state);
                            self.shared.publish(metrics);
                            telemetry::record_pool_exhausted(purpose_tag);
                            warn!(
                                pool_id = self.shared.id,
                                requested = class.rounded_size,
                                available,
                                tag = purpose_tag,
                                "pool exhausted: active regions prevent allocation"
                            );
                            log_security_event(
                                SecurityEvent::PoolExhausted,
                                "Allocation refused: active regions hold the pool",
                                &[
                                    ("tag", purpose_tag),
                                    ("requested", class.rounded_size.to_string().as_str()),
                                    ("available", available.to_string().as_str()),
                                ],
                            );
                            return Err(PoolError::ResourceExhausted {
                                requested: class.rounded_size,
                                available,
                            });
                        }
                    }
                    let id = state.next_region_id;
                    state.next_region_id += 1;
                    let region =
                        PooledRegion::new(id, class.rounded_size, class.category, Arc::clone(&tag));
                    (region, false)
                }
            };

        if let Some(tag_state) = state.tags.get_mut(&tag) {
            if hit {
                tag_state.counters.hits += 1;
            } else {
                tag_state.counters.misses += 1;
            }
            tag_state.active += 1;
        }
        region.in_use = true;
        region.last_used = Instant::now();
        state.active_bytes += region.size();
        state.active.insert(
            region.id,
            ActiveEntry {
                tag: Arc::clone(&tag),
                category: class.category,
                size: region.size(),
                acquired_at: region.last_used,
            },
        );
        // Trim may have emptied other tags.
        state.prune_idle_tags();
        let generation = state.generation;
        let wipe_on_drop = config.secure_clear_on_release || state.profile.force_secure_wipe;
        let metrics = state.metrics(max);
        drop(state);
        self.shared.publish(metrics);
        telemetry::record_acquire(&tag, hit);
        debug!(
            pool_id = self.shared.id,
            region_id = region.id,
            requested = size,
            size = region.size(),
            category = %class.category,
            tag = %tag,
            hit,
            "region acquired"
        );

        Ok(Region {
            inner: region,
            pool_id: self.shared.id,
            generation,
            owner: Arc::downgrade(&self.shared),
            wipe_on_drop,
            released: false,
        })
    }

    /// Release using the configured default wipe setting.
    pub fn release(&self, region: Region) {
        let wipe = self.shared.config.secure_clear_on_release;
        self.release_with(region, wipe);
    }

    /// Release a region, zeroing it first when `secure_wipe` is set (or the
    /// active strategy forces it).
    ///
    /// A region issued by another pool is ignored here; when the handle drops
    /// it returns to the pool that issued it.
    pub fn release_with(&self, mut region: Region, secure_wipe: bool) {
        if region.pool_id != self.shared.id {
            warn!(
                pool_id = self.shared.id,
                owner_pool_id = region.pool_id,
                region_id = region.id(),
                "release of foreign region ignored"
            );
            log_security_event(
                SecurityEvent::ForeignRelease,
                "Region released to a pool that did not issue it",
                &[("region_id", region.id().to_string().as_str()), ("tag", region.purpose_tag())],
            );
            return;
        }
        let generation = region.generation;
        let inner = region.take_inner();
        self.shared.check_in(inner, self.shared.id, generation, secure_wipe);
    }

    /// Evict idle regions so that an allocation of `needed_size` would fit.
    pub fn trim(&self, needed_size: usize) -> TrimOutcome {
        let mut state = self.shared.state.lock();
        let outcome = state.trim(needed_size, &self.shared.config);
        state.prune_idle_tags();
        let metrics = state.metrics(self.shared.config.max_pool_size);
        drop(state);
        self.shared.publish(metrics);
        debug!(pool_id = self.shared.id, needed_size, ?outcome, "trim");
        outcome
    }

    /// Evict idle regions oldest-first until the pool holds at most
    /// `target_ratio * max_pool_size` bytes.
    pub fn relieve_pressure(&self, target_ratio: f64) -> TrimOutcome {
        let max = self.shared.config.max_pool_size;
        let target = (target_ratio.clamp(0.0, 1.0) * max as f64) as usize;
        let mut state = self.shared.state.lock();
        let (evicted_regions, freed_bytes) = state.evict_lru(None, |s| s.total() <= target);
        let fits = state.total() <= target;
        state.prune_idle_tags();
        let metrics = state.metrics(max);
        drop(state);
        self.shared.publish(metrics);
        let mode = if evicted_regions == 0 { TrimMode::None } else { TrimMode::Lru };
        if evicted_regions > 0 {
            info!(pool_id = self.shared.id, evicted_regions, freed_bytes, target, "memory pressure relieved");
        }
        TrimOutcome { mode, evicted_regions, freed_bytes, fits }
    }

    /// Destroy all pooled memory and bookkeeping.
    ///
    /// Idle regions are wiped (when requested) and freed. Regions held by
    /// callers are revoked: they are no longer tracked, and when released or
    /// dropped they are wiped and freed rather than pooled. Not a normal-path
    /// call.
    pub fn reset(&self, secure_wipe: bool) {
        let mut state = self.shared.state.lock();
        let (idle, idle_bytes) = state.flush_free(secure_wipe);
        let revoked = state.active.len();
        state.tags.clear();
        state.active.clear();
        state.free_bytes = 0;
        state.active_bytes = 0;
        state.generation += 1;
        state.resets += 1;
        let metrics = state.metrics(self.shared.config.max_pool_size);
        drop(state);
        self.shared.publish(metrics);
        warn!(
            pool_id = self.shared.id,
            idle_regions = idle,
            idle_bytes,
            revoked_regions = revoked,
            secure_wipe,
            "buffer pool reset"
        );
        log_security_event(
            SecurityEvent::PoolReset,
            "Buffer pool reset",
            &[
                ("pool_id", self.shared.id.to_string().as_str()),
                ("revoked_regions", revoked.to_string().as_str()),
                ("secure_wipe", if secure_wipe { "true" } else { "false" }),
            ],
        );
    }

    /// Latest published metrics.
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics::clone(&self.shared.published.read())
    }

    pub fn total_size(&self) -> usize {
        self.shared.state.lock().total()
    }

    pub fn active_size(&self) -> usize {
        self.shared.state.lock().active_bytes
    }

    pub fn free_size(&self) -> usize {
        self.shared.state.lock().free_bytes
    }

    /// Regions currently held by callers, oldest first.
    pub fn active_regions(&self) -> Vec<ActiveRegionInfo> {
        let state = self.shared.state.lock();
        let mut regions: Vec<ActiveRegionInfo> = state
            .active
            .iter()
            .map(|(id, entry)| ActiveRegionInfo {
                id: *id,
                purpose_tag: entry.tag.to_string(),
                category: entry.category,
                size: entry.size,
                held_for: entry.acquired_at.elapsed(),
            })
            .collect();
        regions.sort_by(|a, b| b.held_for.cmp(&a.held_for));
        regions
    }

    /// Install a strategy profile. Takes effect on the next release.
    pub fn apply_profile(&self, profile: StrategyProfile) {
        debug!(pool_id = self.shared.id, strategy = %profile.name, "strategy profile applied");
        self.shared.state.lock().profile = profile;
    }

    pub fn profile(&self) -> StrategyProfile {
        self.shared.state.lock().profile.clone()
    }

    pub(crate) fn downgrade(&self) -> Weak<PoolShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn from_shared(shared: Arc<PoolShared>) -> Self {
        Self { shared }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .finish()
    }
}
