//! Size classification for pooled buffers.
//!
//! Maps a requested byte count to a coarse [`SizeCategory`] and the rounded
//! size the pool actually allocates. Small tiers round finely and large tiers
//! round coarsely, so internal waste per tier stays bounded:
//!
//! | Category | Requested size | Rounded to a multiple of |
//! |---|---|---|
//! | Tiny   | `< 1 KiB`   | 256 B  |
//! | Small  | `< 64 KiB`  | 4 KiB  |
//! | Medium | `< 1 MiB`   | 64 KiB |
//! | Large  | `< 16 MiB`  | 1 MiB  |
//! | Huge   | `>= 16 MiB` | 4 MiB  |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * 1024;

const SMALL_BOUNDARY: usize = KIB;
const MEDIUM_BOUNDARY: usize = 64 * KIB;
const LARGE_BOUNDARY: usize = MIB;
const HUGE_BOUNDARY: usize = 16 * MIB;

/// Coarse size bucket used to partition pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Tiny,
    Small,
    Medium,
    Large,
    Huge,
}

impl SizeCategory {
    pub const ALL: [SizeCategory; 5] = [
        SizeCategory::Tiny,
        SizeCategory::Small,
        SizeCategory::Medium,
        SizeCategory::Large,
        SizeCategory::Huge,
    ];

    /// Category for a requested size. Zero maps to `Tiny`; use [`classify`]
    /// to reject it.
    pub fn of(size: usize) -> Self {
        if size < SMALL_BOUNDARY {
            Self::Tiny
        } else if size < MEDIUM_BOUNDARY {
            Self::Small
        } else if size < LARGE_BOUNDARY {
            Self::Medium
        } else if size < HUGE_BOUNDARY {
            Self::Large
        } else {
            Self::Huge
        }
    }

    /// Rounding granularity in bytes.
    pub fn granularity(self) -> usize {
        match self {
            Self::Tiny => 256,
            Self::Small => 4 * KIB,
            Self::Medium => 64 * KIB,
            Self::Large => MIB,
            Self::Huge => 4 * MIB,
        }
    }

    /// Dense index, usable for per-category arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Huge => "huge",
        }
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    pub category: SizeCategory,
    pub rounded_size: usize,
}

/// Classify `size` into a category and rounded allocation size.
///
/// Fails with [`PoolError::InvalidSize`] for zero, or when rounding would
/// overflow `usize`.
pub fn classify(size: usize) -> Result<SizeClass, PoolError> {
    if size == 0 {
        return Err(PoolError::InvalidSize(size));
    }
    let category = SizeCategory::of(size);
    let granularity = category.granularity();
    let rounded_size = size
        .checked_add(granularity - 1)
        .map(|v| v / granularity * granularity)
        .ok_or(PoolError::InvalidSize(size))?;
    Ok(SizeClass { category, rounded_size })
}
