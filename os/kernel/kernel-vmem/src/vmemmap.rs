//! # Virtual Descriptor Map
//!
//! Physical memory on large machines is sparse, but code wants to index page
//! descriptors by frame number. The map is a virtually contiguous array of
//! [`PageDescriptor`]s at the top of vmalloc space; only the pages of that
//! array that describe real memory are backed.
//!
//! ```text
//! phys:   [== node 0 ==]      hole       [== node 1 ==]
//! map:    [####]  (unbacked, never touched)  [####]
//!         ^ base = VMALLOC_END               ^ base + pfn × 56
//! ```
//!
//! The map covers frames `0..limit`, where the limit follows from the
//! reserved size. Frames past it have no descriptor.
//!
//! Lookups never fault: [`probe_valid`](SparseDescriptorMap::probe_valid)
//! checks the translation of the bytes a descriptor occupies, and
//! [`find_next_valid_pfn`](SparseDescriptorMap::find_next_valid_pfn) jumps
//! over unpopulated table levels in one step.

use core::sync::atomic::AtomicU64;

use kernel_info::memory::{MAX_ORDER_NR_PAGES, PAGE_SIZE, PMD_SIZE, VMALLOC_END_INIT, VMALLOC_START};
use kernel_memory_addresses::{
    KernelPageSize, PageFrameNumber, PhysicalAddress, VirtualAddress, align_down, align_up,
};
use log::debug;

use crate::descriptor::{
    DESCRIPTOR_SIZE, DESCRIPTOR_WORDS, DescriptorStore, DescriptorView, ZoneInit,
};
use crate::page_table::prot::PAGE_KERNEL;
use crate::page_table::{Level, Pte};
use crate::{KernelPageTable, NodeFrameAlloc, NodeLookup, PhysMapper, WalkError};

/// Where the descriptor map lives and how much vmalloc space it takes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VmemMapLayout {
    /// New end of vmalloc space; also the map base.
    pub vmalloc_end: VirtualAddress,
    /// Bytes reserved for the map.
    pub size: u64,
}

impl VmemMapLayout {
    /// Carve a map for frames `0..max_pfn` from the top of vmalloc space.
    ///
    /// The frame count is rounded up to a whole largest buddy block.
    /// `None` if the map would not leave any vmalloc space.
    #[must_use]
    pub const fn place(max_pfn: PageFrameNumber) -> Option<Self> {
        let frames = align_up(max_pfn.as_u64(), MAX_ORDER_NR_PAGES);
        let Some(bytes) = frames.checked_mul(DESCRIPTOR_SIZE) else {
            return None;
        };
        let size = align_up(bytes, PAGE_SIZE);
        if size >= VMALLOC_END_INIT - VMALLOC_START {
            return None;
        }
        Some(Self {
            vmalloc_end: VirtualAddress::new(VMALLOC_END_INIT - size),
            size,
        })
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.vmalloc_end
    }
}

/// Half-open frame range `[start, end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PfnSpan {
    pub start: PageFrameNumber,
    pub end: PageFrameNumber,
}

impl PfnSpan {
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            start: PageFrameNumber::new(start),
            end: PageFrameNumber::new(end),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmemMapError {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error("frames [{start}, {end}) reach past the descriptor map limit {limit}")]
    OutOfRange {
        start: PageFrameNumber,
        end: PageFrameNumber,
        limit: PageFrameNumber,
    },
}

/// Descriptor array over sparse physical memory.
pub struct SparseDescriptorMap<'m, M: PhysMapper> {
    table: KernelPageTable<'m, M>,
    base: VirtualAddress,
    /// Frames with a slot in the map.
    limit: u64,
}

impl<'m, M: PhysMapper> SparseDescriptorMap<'m, M> {
    /// Map occupying `layout`, populated through `table`.
    #[must_use]
    pub const fn new(table: KernelPageTable<'m, M>, layout: VmemMapLayout) -> Self {
        debug_assert!(layout.base().is_aligned_to(PAGE_SIZE));
        debug_assert!(layout.base().as_u64().checked_add(layout.size).is_some());
        Self {
            table,
            base: layout.base(),
            limit: layout.size / DESCRIPTOR_SIZE,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// One past the last frame the map can describe.
    #[inline]
    #[must_use]
    pub const fn limit(&self) -> PageFrameNumber {
        PageFrameNumber::new(self.limit)
    }

    #[inline]
    #[must_use]
    pub const fn table(&self) -> &KernelPageTable<'m, M> {
        &self.table
    }

    /// Virtual address of `pfn`'s descriptor; `None` past the limit.
    #[inline]
    #[must_use]
    pub const fn descriptor_va(&self, pfn: PageFrameNumber) -> Option<VirtualAddress> {
        if pfn.as_u64() < self.limit {
            Some(VirtualAddress::new(self.slot(pfn)))
        } else {
            None
        }
    }

    /// Address of `pfn`'s slot, with `pfn` clamped to the limit.
    #[inline]
    const fn slot(&self, pfn: PageFrameNumber) -> u64 {
        let pfn = if pfn.as_u64() < self.limit { pfn.as_u64() } else { self.limit };
        self.base.as_u64() + pfn * DESCRIPTOR_SIZE
    }

    /// Frame whose descriptor contains `va`, if `va` lies in the map.
    #[inline]
    #[must_use]
    pub const fn pfn_of(&self, va: VirtualAddress) -> Option<PageFrameNumber> {
        let Some(offset) = va.as_u64().checked_sub(self.base.as_u64()) else {
            return None;
        };
        let pfn = offset / DESCRIPTOR_SIZE;
        if pfn < self.limit {
            Some(PageFrameNumber::new(pfn))
        } else {
            None
        }
    }

    /// Back every map page holding a descriptor for `[phys_start, phys_end)`.
    ///
    /// Pages come from the node owning `phys_start`. Pages already backed
    /// are left alone, so overlapping calls are harmless. Returns the number
    /// of pages newly backed.
    ///
    /// # Errors
    /// - [`VmemMapError::OutOfRange`] if the range reaches past the limit;
    ///   nothing is allocated then.
    /// - [`VmemMapError::Walk`] when a table or backing page cannot be allocated.
    pub fn materialize_range<A: NodeFrameAlloc, N: NodeLookup + ?Sized>(
        &self,
        alloc: &mut A,
        nodes: &N,
        phys_start: PhysicalAddress,
        phys_end: PhysicalAddress,
    ) -> Result<usize, VmemMapError> {
        let (first, last) = (phys_start.pfn(), phys_end.pfn());
        if last.as_u64() > self.limit || first.as_u64() > self.limit {
            return Err(VmemMapError::OutOfRange {
                start: first,
                end: last,
                limit: self.limit(),
            });
        }
        let start = align_down(self.slot(first), PAGE_SIZE);
        let end = align_up(self.slot(last), PAGE_SIZE);
        let node = nodes.node_of(phys_start);

        let mut backed = 0;
        let mut va = start;
        while va < end {
            let addr = VirtualAddress::new(va);
            let slot = self.table.ensure_mapped(alloc, node, addr)?;
            if slot.is_none() {
                let page = alloc.alloc_node_page(node).ok_or(WalkError {
                    level: Level::Pte,
                    node,
                    va: addr,
                })?;
                self.table.zero_page(page);
                *slot = Pte::make(page, PAGE_KERNEL);
                backed += 1;
            }
            va += PAGE_SIZE;
        }

        debug!(
            "vmem_map: [{phys_start}, {phys_end}) -> [{start:#x}, {end:#x}), {backed} new pages on {node:?}"
        );
        Ok(backed)
    }

    /// Whether every byte of `pfn`'s descriptor is backed.
    ///
    /// Reads the first byte and, when the descriptor straddles a page, its
    /// last byte. A missing translation counts as "not backed", and so does
    /// any frame past the limit.
    #[must_use]
    pub fn probe_valid(&self, pfn: PageFrameNumber) -> bool {
        let Some(first) = self.descriptor_va(pfn) else {
            return false;
        };
        let last = first + (DESCRIPTOR_SIZE - 1);
        self.table.read_byte(first).is_some()
            && (first.page::<KernelPageSize>() == last.page::<KernelPageSize>()
                || self.table.read_byte(last).is_some())
    }

    /// Offset from `node.start` of the first frame at or after
    /// `node.start + i` whose descriptor page may be backed.
    ///
    /// Unpopulated directory levels are skipped up to their next boundary;
    /// inside a populated leaf table entries are scanned one by one up to the
    /// end of that table. Returns `node.end - node.start` if nothing follows,
    /// including when the rest of the node lies past the limit.
    #[must_use]
    pub fn find_next_valid_pfn(&self, node: PfnSpan, i: u64) -> u64 {
        let size = node.end.as_u64().saturating_sub(node.start.as_u64());
        let from = PageFrameNumber::new(node.start.as_u64().saturating_add(i));
        let stop = self.slot(node.end);
        let mut end = align_up(self.slot(from), PAGE_SIZE);

        'walk: while end < stop {
            match self.table.leaf_table(VirtualAddress::new(end)) {
                Err(level) => {
                    end = align_down(end, level.span()) + level.span();
                }
                Ok(leaf) => loop {
                    if !leaf.get(Level::Pte.index(VirtualAddress::new(end))).is_none() {
                        break 'walk;
                    }
                    end += PAGE_SIZE;
                    if end >= stop || end.is_multiple_of(PMD_SIZE) {
                        break;
                    }
                },
            }
        }

        if end >= stop {
            return size;
        }
        let pfn = (end - self.base.as_u64()).div_ceil(DESCRIPTOR_SIZE);
        pfn.saturating_sub(node.start.as_u64()).min(size)
    }

    /// Initialize the descriptors for the extent `[phys_start, phys_end)`
    /// that fall in `zone`, widened to every whole descriptor on the map
    /// pages touched. Returns the number initialized.
    ///
    /// The map pages must have been materialized for the extent.
    pub fn finish_zone_init(
        &self,
        phys_start: PhysicalAddress,
        phys_end: PhysicalAddress,
        zone: PfnSpan,
        args: &ZoneInit,
    ) -> u64 {
        let limit = self.limit();
        let mut first = phys_start.pfn().max(zone.start).min(limit).as_u64();
        let mut last = phys_end.pfn().min(zone.end).min(limit).as_u64();
        if first >= last {
            return 0;
        }

        let start_va = self.slot(PageFrameNumber::new(first));
        first -= (start_va & (PAGE_SIZE - 1)) / DESCRIPTOR_SIZE;
        let end_va = self.slot(PageFrameNumber::new(last));
        last += (align_up(end_va, PAGE_SIZE) - end_va) / DESCRIPTOR_SIZE;

        if first >= last {
            return 0;
        }
        self.init_range(PageFrameNumber::new(first), last - first, args)
    }
}

impl<M: PhysMapper> DescriptorStore for SparseDescriptorMap<'_, M> {
    fn descriptor(&self, pfn: PageFrameNumber) -> Option<DescriptorView<'_>> {
        let va = self.descriptor_va(pfn)?;
        let word = |n: u64| self.table.resolve::<AtomicU64>(va + n * 8);
        Some(DescriptorView::new([
            word(0)?,
            word(1)?,
            word(2)?,
            word(3)?,
            word(4)?,
            word(5)?,
            word(6)?,
        ]))
    }

    fn is_pfn_valid(&self, pfn: PageFrameNumber) -> bool {
        self.probe_valid(pfn)
    }
}

const _: () = assert!(DESCRIPTOR_WORDS * 8 == DESCRIPTOR_SIZE as usize);
