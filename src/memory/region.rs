//! Pooled memory regions and secure wiping.
//!
//! A [`Region`] is the caller's handle to one pooled buffer between acquire
//! and release. While a caller holds it, the pool's active set records the
//! region's id and size but not its bytes; the buffer itself lives in the
//! handle. Release moves the bytes back into a free list.
//!
//! Dropping a `Region` without releasing it returns the buffer to the pool
//! that created it, using that pool's default wipe setting.

use std::fmt;
use std::sync::atomic::{compiler_fence, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use super::pool::PoolShared;
use super::size_class::SizeCategory;

/// Identifier of a region, stable across reuse.
pub type RegionId = u64;

/// Overwrite every byte with zero in a way the optimizer cannot elide.
pub fn secure_wipe(buf: &mut [u8]) {
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `buf`.
        unsafe { std::ptr::write_volatile(byte, 0) };
    }
    compiler_fence(Ordering::SeqCst);
}

/// Pool-side record of a region. Lives in a free list while idle and inside
/// a [`Region`] handle while in use.
pub(crate) struct PooledRegion {
    pub(crate) id: RegionId,
    pub(crate) buffer: Box<[u8]>,
    pub(crate) category: SizeCategory,
    pub(crate) tag: Arc<str>,
    pub(crate) in_use: bool,
    pub(crate) last_used: Instant,
}

impl PooledRegion {
    pub(crate) fn new(id: RegionId, size: usize, category: SizeCategory, tag: Arc<str>) -> Self {
        Self {
            id,
            buffer: vec![0u8; size].into_boxed_slice(),
            category,
            tag,
            in_use: false,
            last_used: Instant::now(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn wipe(&mut self) {
        secure_wipe(&mut self.buffer);
    }
}

/// Handle to an acquired buffer.
pub struct Region {
    pub(crate) inner: PooledRegion,
    pub(crate) pool_id: u64,
    pub(crate) generation: u64,
    pub(crate) owner: Weak<PoolShared>,
    pub(crate) wipe_on_drop: bool,
    pub(crate) released: bool,
}

impl Region {
    pub fn id(&self) -> RegionId {
        self.inner.id
    }

    /// Allocated size in bytes (the rounded size, not the requested one).
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn len(&self) -> usize {
        self.inner.size()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.size() == 0
    }

    pub fn category(&self) -> SizeCategory {
        self.inner.category
    }

    pub fn purpose_tag(&self) -> &str {
        &self.inner.tag
    }

    /// True from acquire until release.
    pub fn is_in_use(&self) -> bool {
        self.inner.in_use
    }

    pub fn last_used(&self) -> Instant {
        self.inner.last_used
    }

    /// Id of the pool that issued this region.
    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner.buffer
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.inner.buffer
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.inner.buffer.as_ptr()
    }

    /// Detach the pooled record so the pool can take the bytes back.
    pub(crate) fn take_inner(&mut self) -> PooledRegion {
        self.released = true;
        let placeholder = PooledRegion {
            id: self.inner.id,
            buffer: Box::default(),
            category: self.inner.category,
            tag: Arc::clone(&self.inner.tag),
            in_use: false,
            last_used: self.inner.last_used,
        };
        std::mem::replace(&mut self.inner, placeholder)
    }
}

impl AsRef<[u8]> for Region {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for Region {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.inner.id)
            .field("size", &self.inner.size())
            .field("category", &self.inner.category)
            .field("purpose_tag", &&*self.inner.tag)
            .field("pool_id", &self.pool_id)
            .finish()
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let wipe = self.wipe_on_drop;
        let generation = self.generation;
        let pool_id = self.pool_id;
        let mut inner = self.take_inner();
        match self.owner.upgrade() {
            Some(shared) => shared.check_in(inner, pool_id, generation, wipe),
            None => inner.wipe(),
        }
    }
}
