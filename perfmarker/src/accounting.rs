//! Proportional-share page accounting
//!
//! PSS is accumulated in fixed point: every contribution is scaled by
//! [`PSS_MULTIPLIER`], the least common multiple of the supported share
//! counts 1 through 7, so each `1/share_count` term is an exact integer. The
//! scale is divided out once, when pages are converted to bytes.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::pagemap::PageEntry;

/// LCM of 1, 2, 3, 4, 5, 6, 7
pub const PSS_MULTIPLIER: u64 = 420;

/// Largest share count tracked per page; higher counts are clamped
pub const MAX_SHARE_COUNT: u8 = 7;

/// Page counts for one process at one sampling instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySample {
    /// Pages mapped by this process only
    pub private_pages: u64,

    /// Proportional share in units of `1 / PSS_MULTIPLIER` pages
    pub pss_units: u64,

    /// Resident pages, private and shared
    pub working_set_pages: u64,
}

/// Byte sizes reported to the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBytes {
    pub private_bytes: u64,
    pub pss_bytes: u64,
    pub working_set_bytes: u64,
}

/// Sum over every process sampled in one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMemorySample {
    pub processes: usize,
    pub bytes: MemoryBytes,
}

/// Fixed-point PSS contribution of one resident page
#[inline]
pub fn pss_contribution(page: PageEntry) -> u64 {
    if page.is_shared() {
        let share_count = page.share_count().clamp(1, MAX_SHARE_COUNT);
        PSS_MULTIPLIER / u64::from(share_count)
    } else {
        PSS_MULTIPLIER
    }
}

impl MemorySample {
    /// Walk a resident page table
    pub fn from_pages(pages: &[PageEntry]) -> Self {
        let mut sample = MemorySample {
            working_set_pages: pages.len() as u64,
            ..MemorySample::default()
        };

        for &page in pages {
            if !page.is_shared() {
                sample.private_pages += 1;
            }
            sample.pss_units += pss_contribution(page);
        }

        sample
    }

    /// Proportional share in (possibly fractional) pages
    pub fn proportional_share_pages(&self) -> f64 {
        self.pss_units as f64 / PSS_MULTIPLIER as f64
    }

    /// Convert page counts to bytes; the PSS scale is divided out here
    pub fn to_bytes(&self, page_size: u64) -> MemoryBytes {
        MemoryBytes {
            private_bytes: self.private_pages * page_size,
            pss_bytes: self.pss_units * page_size / PSS_MULTIPLIER,
            working_set_bytes: self.working_set_pages * page_size,
        }
    }
}

impl Add for MemoryBytes {
    type Output = MemoryBytes;

    fn add(self, rhs: MemoryBytes) -> MemoryBytes {
        MemoryBytes {
            private_bytes: self.private_bytes + rhs.private_bytes,
            pss_bytes: self.pss_bytes + rhs.pss_bytes,
            working_set_bytes: self.working_set_bytes + rhs.working_set_bytes,
        }
    }
}

impl AddAssign for MemoryBytes {
    fn add_assign(&mut self, rhs: MemoryBytes) {
        *self = *self + rhs;
    }
}

impl AggregateMemorySample {
    pub fn add_process(&mut self, bytes: MemoryBytes) {
        self.processes += 1;
        self.bytes += bytes;
    }
}
