//! # Kernel Virtual Memory Bootstrap
//!
//! IA-64 paging bring-up for the kernel's own address space.
//!
//! ## What you get
//! - A four-level [`KernelPageTable`] walker that populates the kernel tree on
//!   demand from a node-aware bootstrap allocator.
//! - [`VlptConfig`]: size and placement of the virtual linear page table
//!   derived from the implemented virtual-address width.
//! - [`SparseDescriptorMap`]: a virtually contiguous array of page
//!   descriptors backed only where physical memory exists, with hole skipping
//!   and a fault-free validity probe.
//! - [`gate`]: the fixed user-visible gate window and its shared region.
//! - [`process`]: initial regions of a new process address space.
//! - [`cache`]: instruction-cache coherency and DMA clean marking.
//!
//! ## Regions
//!
//! ```text
//! | 63‒61  | 60‒0                        |
//! | region | offset translated per region |
//! ```
//!
//! Region 5 holds everything built here: the gate window at its base,
//! vmalloc space with the descriptor map carved from its top, and the
//! virtual linear page table at the very top of the region.
//!
//! ## Collaborators
//!
//! The crate owns no memory. Page frames come from a [`NodeFrameAlloc`];
//! physical frames are reached through a [`PhysMapper`]; which node owns a
//! physical address is answered by a [`NodeLookup`].

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

pub mod cache;
pub mod descriptor;
pub mod gate;
pub mod page_table;
pub mod process;
pub mod vlpt;
pub mod vma;
pub mod vmemmap;
mod walker;

#[cfg(test)]
mod test_support;

pub use crate::cache::{CacheMaintenance, mark_dma_page_clean, sync_instruction_cache_with_data};
pub use crate::descriptor::{DescriptorStore, PageDescriptor, PageFlags};
pub use crate::gate::{GateError, GateImage, GateLayout, install_gate};
pub use crate::page_table::{Level, PageProt, Pte};
pub use crate::vlpt::{VlptConfig, VlptError};
pub use crate::vma::{RegionInsertError, RegionSet, VmFlags, VmRegion};
pub use crate::vmemmap::{PfnSpan, SparseDescriptorMap, VmemMapError, VmemMapLayout};
pub use crate::walker::{KernelPageTable, Probe, WalkError};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{KernelPageSize, NodeId, PhysicalAddress, PhysicalPage};

/// Bootstrap page allocator with node affinity.
///
/// Implementations should prefer `node` and may fall back to other nodes.
/// Returned pages need not be zeroed.
pub trait NodeFrameAlloc {
    /// One kernel page, or `None` when memory is exhausted.
    fn alloc_node_page(&mut self, node: NodeId) -> Option<PhysicalPage<KernelPageSize>>;
}

impl<A: NodeFrameAlloc + ?Sized> NodeFrameAlloc for &mut A {
    #[inline]
    fn alloc_node_page(&mut self, node: NodeId) -> Option<PhysicalPage<KernelPageSize>> {
        (**self).alloc_node_page(node)
    }
}

/// Converts physical addresses to usable references in the current address
/// space (on IA-64 through the region 7 identity map).
pub trait PhysMapper {
    /// # Safety
    /// - `pa` must be backed by RAM that is writable through this mapping.
    /// - The bytes at `pa` must be a valid `T`, suitably aligned.
    /// - The caller must not create aliasing `&mut` for the lifetime `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Answers which NUMA node owns a physical address.
pub trait NodeLookup {
    fn node_of(&self, pa: PhysicalAddress) -> NodeId;
}

/// Every address belongs to node 0.
#[derive(Copy, Clone, Debug, Default)]
pub struct SingleNode;

impl NodeLookup for SingleNode {
    #[inline]
    fn node_of(&self, _pa: PhysicalAddress) -> NodeId {
        NodeId::BOOT
    }
}

/// A fixed node for every address.
impl NodeLookup for NodeId {
    #[inline]
    fn node_of(&self, _pa: PhysicalAddress) -> NodeId {
        *self
    }
}

/// Node ranges as reported by firmware; unlisted addresses map to node 0.
#[derive(Copy, Clone, Debug)]
pub struct NodeRanges<'a> {
    ranges: &'a [(u64, u64, NodeId)],
}

impl<'a> NodeRanges<'a> {
    /// `ranges` holds `(start, end, node)` with `end` exclusive.
    #[must_use]
    pub const fn new(ranges: &'a [(u64, u64, NodeId)]) -> Self {
        Self { ranges }
    }
}

impl NodeLookup for NodeRanges<'_> {
    fn node_of(&self, pa: PhysicalAddress) -> NodeId {
        let pa = pa.as_u64();
        self.ranges
            .iter()
            .find(|(start, end, _)| (*start..*end).contains(&pa))
            .map_or(NodeId::BOOT, |&(_, _, node)| node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ranges_lookup() {
        let table = [
            (0, 0x4000_0000, NodeId::new(0)),
            (0x1_0000_0000, 0x2_0000_0000, NodeId::new(1)),
        ];
        let nodes = NodeRanges::new(&table);
        assert_eq!(nodes.node_of(PhysicalAddress::new(0x1000)), NodeId::new(0));
        assert_eq!(nodes.node_of(PhysicalAddress::new(0x1_8000_0000)), NodeId::new(1));
        assert_eq!(nodes.node_of(PhysicalAddress::new(0x2_0000_0000)), NodeId::BOOT);
    }
}
