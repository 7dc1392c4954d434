//! # Range Discovery
//!
//! Turns firmware memory extents into memblock regions and keeps the global
//! PFN watermarks.
//!
//! With the `kexec` feature a crash-dump reservation is cut out of every
//! extent before registration; an extent inside the reservation registers
//! nothing, one straddling it registers the pieces on either side.

use core::sync::atomic::{AtomicU64, Ordering};

use kernel_info::boot::PhysExtent;
use kernel_info::memory::PAGE_SHIFT;
use kernel_memory_addresses::{NodeId, PageFrameNumber, PhysicalAddress, align_up};
use log::debug;

use crate::memblock::{MemBlock, MemBlockError};

/// The parts of `ext` outside `hole`, lower part first.
#[must_use]
pub const fn split_around(ext: PhysExtent, hole: PhysExtent) -> [Option<PhysExtent>; 2] {
    if hole.is_empty() || hole.end <= ext.start || ext.end <= hole.start {
        return [Some(ext), None];
    }
    let below = PhysExtent {
        start: ext.start,
        end: hole.start,
    };
    let above = PhysExtent {
        start: hole.end,
        end: ext.end,
    };
    [
        if below.is_empty() { None } else { Some(below) },
        if above.is_empty() { None } else { Some(above) },
    ]
}

/// Feeds extents to a [`MemBlock`], honouring the crash reservation.
#[derive(Debug, Default)]
pub struct RangeRegistrar {
    #[cfg(feature = "kexec")]
    crash: Option<PhysExtent>,
    registered: u64,
}

impl RangeRegistrar {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            #[cfg(feature = "kexec")]
            crash: None,
            registered: 0,
        }
    }

    /// Registrar that keeps `crash` out of registered memory.
    #[cfg(feature = "kexec")]
    #[must_use]
    pub const fn with_crash_reservation(crash: PhysExtent) -> Self {
        Self {
            crash: Some(crash),
            registered: 0,
        }
    }

    /// Bytes registered so far.
    #[must_use]
    pub const fn registered(&self) -> u64 {
        self.registered
    }

    /// Register `[start, start + len)` on `node`, minus the crash reservation.
    /// Returns the bytes registered by this call.
    ///
    /// # Errors
    /// Propagates [`MemBlockError`] from the region table.
    pub fn register_range(
        &mut self,
        memblock: &mut MemBlock,
        start: PhysicalAddress,
        len: u64,
        node: NodeId,
    ) -> Result<u64, MemBlockError> {
        let ext = PhysExtent {
            start: start.as_u64(),
            end: start.as_u64().saturating_add(len),
        };

        #[cfg(feature = "kexec")]
        let pieces = match self.crash {
            Some(hole) => split_around(ext, hole),
            None => [Some(ext), None],
        };
        #[cfg(not(feature = "kexec"))]
        let pieces = [Some(ext), None];

        let mut added = 0;
        for piece in pieces.into_iter().flatten().filter(|p| !p.is_empty()) {
            memblock.add_node(PhysicalAddress::new(piece.start), piece.len(), node)?;
            added += piece.len();
        }
        if added != ext.len() {
            debug!(
                "ranges: [{:#x}, {:#x}) on {node:?} trimmed to {added:#x} bytes",
                ext.start, ext.end
            );
        }
        self.registered += added;
        Ok(added)
    }
}

/// Lowest and highest usable PFN seen so far.
#[derive(Debug)]
pub struct PfnBounds {
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for PfnBounds {
    fn default() -> Self {
        Self::new()
    }
}

impl PfnBounds {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Widen the bounds to cover `[start, end)`, rounded outwards to the
    /// identity-mapping granule (or to pages with `flatmem`).
    pub fn track(&self, start: u64, end: u64) {
        if end <= start {
            return;
        }
        #[cfg(feature = "flatmem")]
        let (lo, hi) = {
            use kernel_info::memory::PAGE_SIZE;
            (align_up(start, PAGE_SIZE), align_up(end - 1, PAGE_SIZE))
        };
        #[cfg(not(feature = "flatmem"))]
        let (lo, hi) = {
            use kernel_info::memory::GRANULE_SIZE;
            use kernel_memory_addresses::align_down;
            (align_down(start, GRANULE_SIZE), align_up(end - 1, GRANULE_SIZE))
        };

        self.min.fetch_min(lo >> PAGE_SHIFT, Ordering::Relaxed);
        self.max.fetch_max(hi >> PAGE_SHIFT, Ordering::Relaxed);
    }

    /// Lowest PFN, if anything was tracked.
    #[must_use]
    pub fn min_low_pfn(&self) -> Option<PageFrameNumber> {
        let min = self.min.load(Ordering::Relaxed);
        (min != u64::MAX).then_some(PageFrameNumber::new(min))
    }

    /// One past the highest PFN; zero if nothing was tracked.
    #[must_use]
    pub fn max_low_pfn(&self) -> PageFrameNumber {
        PageFrameNumber::new(self.max.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::PAGE_SIZE;

    fn ext(start: u64, end: u64) -> PhysExtent {
        PhysExtent { start, end }
    }

    #[test]
    fn split_cases() {
        let hole = ext(100, 200);
        assert_eq!(split_around(ext(50, 250), hole), [Some(ext(50, 100)), Some(ext(200, 250))]);
        assert_eq!(split_around(ext(120, 180), hole), [None, None]);
        assert_eq!(split_around(ext(50, 150), hole), [Some(ext(50, 100)), None]);
        assert_eq!(split_around(ext(150, 250), hole), [None, Some(ext(200, 250))]);
        assert_eq!(split_around(ext(0, 100), hole), [Some(ext(0, 100)), None]);
        assert_eq!(split_around(ext(200, 300), hole), [Some(ext(200, 300)), None]);
    }

    #[cfg(feature = "kexec")]
    #[test]
    fn crash_reservation_splits_an_extent() {
        let mut mb = MemBlock::new();
        let mut reg = RangeRegistrar::with_crash_reservation(ext(100 * PAGE_SIZE, 200 * PAGE_SIZE));
        let added = reg
            .register_range(&mut mb, PhysicalAddress::new(50 * PAGE_SIZE), 200 * PAGE_SIZE, NodeId::BOOT)
            .unwrap();

        assert_eq!(added, 100 * PAGE_SIZE);
        let regions: Vec<(u64, u64)> = mb
            .memory()
            .iter()
            .map(|r| (r.base.as_u64() / PAGE_SIZE, r.end() / PAGE_SIZE))
            .collect();
        assert_eq!(regions, [(50, 100), (200, 250)]);
    }

    #[cfg(feature = "kexec")]
    #[test]
    fn extent_inside_reservation_is_dropped() {
        let mut mb = MemBlock::new();
        let mut reg = RangeRegistrar::with_crash_reservation(ext(0x1000_0000, 0x2000_0000));
        let added = reg
            .register_range(&mut mb, PhysicalAddress::new(0x1800_0000), 0x10_0000, NodeId::BOOT)
            .unwrap();
        assert_eq!(added, 0);
        assert!(mb.memory().is_empty());
    }

    #[test]
    fn plain_registration_accumulates() {
        let mut mb = MemBlock::new();
        let mut reg = RangeRegistrar::new();
        reg.register_range(&mut mb, PhysicalAddress::new(0), 0x4000, NodeId::BOOT)
            .unwrap();
        reg.register_range(&mut mb, PhysicalAddress::new(0x10_0000), 0x8000, NodeId::new(1))
            .unwrap();
        assert_eq!(reg.registered(), 0xC000);
        assert_eq!(mb.total_memory(), 0xC000);
    }

    #[test]
    fn bounds_start_empty() {
        let b = PfnBounds::new();
        assert_eq!(b.min_low_pfn(), None);
        assert_eq!(b.max_low_pfn(), PageFrameNumber::new(0));
        b.track(0x5000, 0x5000);
        assert_eq!(b.min_low_pfn(), None);
    }

    #[cfg(not(feature = "flatmem"))]
    #[test]
    fn bounds_round_to_granules() {
        use kernel_info::memory::GRANULE_SIZE;

        let b = PfnBounds::new();
        b.track(GRANULE_SIZE + PAGE_SIZE, 3 * GRANULE_SIZE - PAGE_SIZE);
        b.track(5 * GRANULE_SIZE, 5 * GRANULE_SIZE + 2 * PAGE_SIZE);
        let per_granule = GRANULE_SIZE / PAGE_SIZE;
        assert_eq!(b.min_low_pfn(), Some(PageFrameNumber::new(per_granule)));
        assert_eq!(b.max_low_pfn(), PageFrameNumber::new(6 * per_granule));
    }

    #[cfg(feature = "flatmem")]
    #[test]
    fn bounds_round_to_pages() {
        let b = PfnBounds::new();
        b.track(PAGE_SIZE + 1, 4 * PAGE_SIZE);
        assert_eq!(b.min_low_pfn(), Some(PageFrameNumber::new(2)));
        // end - 1 aligned up: the last page counts as its own start
        assert_eq!(b.max_low_pfn(), PageFrameNumber::new(4));
    }
}
