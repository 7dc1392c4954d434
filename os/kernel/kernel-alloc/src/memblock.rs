//! # Boot Memory Blocks
//!
//! The early physical allocator. Two fixed-capacity tables record what
//! memory exists (per node) and what is already taken; a page is free when
//! it lies in a `memory` region and in no `reserved` region.
//!
//! No heap is needed: both tables live inline in [`MemBlock`], which is
//! meant to sit in a static.

use core::fmt;

use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{
    KernelPageSize, NodeId, PhysicalAddress, PhysicalPage, align_down, align_up,
};
use kernel_vmem::NodeFrameAlloc;
use log::{debug, trace};

/// Capacity of each region table.
pub const MAX_REGIONS: usize = 128;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemBlockError {
    #[error("memblock {table} table full ({capacity} regions)")]
    TableFull {
        table: &'static str,
        capacity: usize,
    },
}

/// `[base, base + size)` on `node`.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct MemRegion {
    pub base: PhysicalAddress,
    pub size: u64,
    pub node: NodeId,
}

impl MemRegion {
    const EMPTY: Self = Self {
        base: PhysicalAddress::zero(),
        size: 0,
        node: NodeId::BOOT,
    };

    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u64() + self.size
    }
}

impl fmt::Debug for MemRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{:#018x}) {:?}", self.base, self.end(), self.node)
    }
}

/// Sorted, non-overlapping regions.
struct RegionTable {
    name: &'static str,
    regions: [MemRegion; MAX_REGIONS],
    len: usize,
}

impl RegionTable {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            regions: [MemRegion::EMPTY; MAX_REGIONS],
            len: 0,
        }
    }

    fn as_slice(&self) -> &[MemRegion] {
        &self.regions[..self.len]
    }

    const fn full(&self) -> MemBlockError {
        MemBlockError::TableFull {
            table: self.name,
            capacity: MAX_REGIONS,
        }
    }

    fn insert_at(&mut self, at: usize, r: MemRegion) -> Result<(), MemBlockError> {
        if self.len == MAX_REGIONS {
            return Err(self.full());
        }
        self.regions.copy_within(at..self.len, at + 1);
        self.regions[at] = r;
        self.len += 1;
        Ok(())
    }

    fn remove_at(&mut self, at: usize) {
        self.regions.copy_within(at + 1..self.len, at);
        self.len -= 1;
    }

    /// Add `[start, end)`, merging with neighbours it overlaps or touches on
    /// the same node. Parts already covered are not added twice.
    fn add(&mut self, start: u64, end: u64, node: NodeId) -> Result<(), MemBlockError> {
        if start >= end {
            return Ok(());
        }
        let (mut start, mut end) = (start, end);

        // absorb every same-node region that overlaps or touches
        let mut i = 0;
        while i < self.len {
            let r = self.regions[i];
            if r.node == node && r.base.as_u64() <= end && start <= r.end() {
                start = start.min(r.base.as_u64());
                end = end.max(r.end());
                self.remove_at(i);
            } else {
                i += 1;
            }
        }

        let at = self.as_slice().partition_point(|r| r.base.as_u64() < start);
        self.insert_at(
            at,
            MemRegion {
                base: PhysicalAddress::new(start),
                size: end - start,
                node,
            },
        )
    }

    /// Cut `[start, end)` out of every region. Returns the bytes removed.
    ///
    /// Either the whole range is cut or, when a split needs a slot the table
    /// does not have, nothing is.
    fn remove(&mut self, start: u64, end: u64) -> Result<u64, MemBlockError> {
        let splits = self
            .as_slice()
            .iter()
            .filter(|r| r.base.as_u64() < start && end < r.end())
            .count();
        if self.len + splits > MAX_REGIONS {
            return Err(self.full());
        }

        let mut removed = 0;
        let mut i = 0;
        while i < self.len {
            let r = self.regions[i];
            let (lo, hi) = (r.base.as_u64().max(start), r.end().min(end));
            if lo >= hi {
                i += 1;
                continue;
            }
            removed += hi - lo;

            let head = MemRegion {
                size: lo - r.base.as_u64(),
                ..r
            };
            let tail = MemRegion {
                base: PhysicalAddress::new(hi),
                size: r.end() - hi,
                node: r.node,
            };
            match (head.size > 0, tail.size > 0) {
                (true, true) => {
                    self.insert_at(i + 1, tail)?;
                    self.regions[i] = head;
                    i += 2;
                }
                (true, false) => {
                    self.regions[i] = head;
                    i += 1;
                }
                (false, true) => {
                    self.regions[i] = tail;
                    i += 1;
                }
                (false, false) => self.remove_at(i),
            }
        }
        Ok(removed)
    }

    /// First region overlapping `[start, end)`.
    fn first_overlap(&self, start: u64, end: u64) -> Option<&MemRegion> {
        self.as_slice()
            .iter()
            .find(|r| r.base.as_u64() < end && start < r.end())
    }

    fn total(&self) -> u64 {
        self.as_slice().iter().map(|r| r.size).sum()
    }
}

/// The boot-time physical memory allocator.
pub struct MemBlock {
    memory: RegionTable,
    reserved: RegionTable,
}

impl Default for MemBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBlock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            memory: RegionTable::new("memory"),
            reserved: RegionTable::new("reserved"),
        }
    }

    /// Record `[base, base + size)` as RAM on `node`.
    ///
    /// # Errors
    /// [`MemBlockError::TableFull`] when the memory table has no room.
    pub fn add_node(
        &mut self,
        base: PhysicalAddress,
        size: u64,
        node: NodeId,
    ) -> Result<(), MemBlockError> {
        debug!("memblock: add {base} + {size:#x} on {node:?}");
        self.memory
            .add(base.as_u64(), base.as_u64().saturating_add(size), node)
    }

    /// Mark `[base, base + size)` as in use.
    ///
    /// # Errors
    /// [`MemBlockError::TableFull`] when the reserved table has no room.
    pub fn reserve(&mut self, base: PhysicalAddress, size: u64) -> Result<(), MemBlockError> {
        trace!("memblock: reserve {base} + {size:#x}");
        self.reserved
            .add(base.as_u64(), base.as_u64().saturating_add(size), NodeId::BOOT)
    }

    /// Return the whole pages of `[start, end)` to the free pool. Returns the
    /// number of bytes that were reserved and are now free.
    ///
    /// # Errors
    /// [`MemBlockError::TableFull`] if splitting a reservation needs a slot
    /// the table does not have.
    pub fn free_reserved_range(
        &mut self,
        start: PhysicalAddress,
        end: PhysicalAddress,
    ) -> Result<u64, MemBlockError> {
        let start = align_up(start.as_u64(), PAGE_SIZE);
        let end = align_down(end.as_u64(), PAGE_SIZE);
        if start >= end {
            return Ok(0);
        }
        self.reserved.remove(start, end)
    }

    #[must_use]
    pub fn memory(&self) -> &[MemRegion] {
        self.memory.as_slice()
    }

    #[must_use]
    pub fn reserved(&self) -> &[MemRegion] {
        self.reserved.as_slice()
    }

    /// Bytes of registered RAM.
    #[must_use]
    pub fn total_memory(&self) -> u64 {
        self.memory.total()
    }

    /// Bytes of registered RAM not currently reserved.
    #[must_use]
    pub fn free_memory(&self) -> u64 {
        let mut free = 0;
        for m in self.memory() {
            let mut covered = 0;
            for r in self.reserved() {
                let (lo, hi) = (m.base.as_u64().max(r.base.as_u64()), m.end().min(r.end()));
                covered += hi.saturating_sub(lo);
            }
            free += m.size - covered;
        }
        free
    }

    /// Whether `pa` lies in registered RAM.
    #[must_use]
    pub fn is_memory(&self, pa: PhysicalAddress) -> bool {
        self.memory
            .first_overlap(pa.as_u64(), pa.as_u64().saturating_add(1))
            .is_some()
    }

    /// Lowest free page in any region of `node`.
    fn find_in_node(&self, node: Option<NodeId>) -> Option<u64> {
        for m in self.memory() {
            if node.is_some_and(|n| n != m.node) {
                continue;
            }
            let mut candidate = align_up(m.base.as_u64(), PAGE_SIZE);
            while candidate + PAGE_SIZE <= m.end() {
                match self.reserved.first_overlap(candidate, candidate + PAGE_SIZE) {
                    None => return Some(candidate),
                    Some(r) => candidate = align_up(r.end(), PAGE_SIZE),
                }
            }
        }
        None
    }
}

impl NodeFrameAlloc for MemBlock {
    /// Prefer `node`; fall back to any node.
    fn alloc_node_page(&mut self, node: NodeId) -> Option<PhysicalPage<KernelPageSize>> {
        let pa = self
            .find_in_node(Some(node))
            .or_else(|| self.find_in_node(None))?;
        self.reserve(PhysicalAddress::new(pa), PAGE_SIZE).ok()?;
        Some(PhysicalPage::from_addr(PhysicalAddress::new(pa)))
    }
}
