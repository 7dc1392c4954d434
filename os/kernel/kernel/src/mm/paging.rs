use kernel_alloc::{MemBlock, RangeRegistrar};
use kernel_info::boot::FirmwareMemoryMap;
use kernel_memory_addresses::{NodeId, PhysicalAddress};
use kernel_vmem::{
    KernelPageTable, NodeFrameAlloc, NodeLookup, PhysMapper, SparseDescriptorMap, VmemMapError,
    VmemMapLayout,
};
use log::{debug, info};

use crate::{BootError, MmState};

/// Register every usable firmware extent with `memblock` and widen the PFN
/// watermarks to cover it. Returns the total bytes registered so far.
///
/// # Errors
/// [`BootError::MemBlock`] when the region table overflows.
pub fn register_memory<N: NodeLookup + ?Sized>(
    state: &MmState,
    memblock: &mut MemBlock,
    registrar: &mut RangeRegistrar,
    fw: &FirmwareMemoryMap<'_>,
    nodes: &N,
) -> Result<u64, BootError> {
    fw.walk(|start, end| {
        state.bounds().track(start, end);
        let pa = PhysicalAddress::new(start);
        registrar
            .register_range(memblock, pa, end - start, nodes.node_of(pa))
            .map(|_| ())
    })?;
    info!(
        "memory: {} KiB registered, PFNs {:?}..{}",
        registrar.registered() >> 10,
        state.bounds().min_low_pfn(),
        state.bounds().max_low_pfn()
    );
    Ok(registrar.registered())
}

/// Place the virtual descriptor map below the top of vmalloc space and back
/// it for every firmware extent; allocate the shared zero page.
///
/// Expects [`register_memory`] to have run so the PFN watermarks are known.
///
/// # Errors
/// - [`BootError::VmemMapTooLarge`] or [`BootError::VmemMapOverlapsVlpt`]
///   when the map cannot be placed.
/// - [`BootError::VmemMap`] when a backing page cannot be allocated.
/// - [`BootError::OutOfMemory`] when no zero page is left.
pub fn paging_init<'m, M, A, N>(
    state: &MmState,
    table: KernelPageTable<'m, M>,
    alloc: &mut A,
    nodes: &N,
    fw: &FirmwareMemoryMap<'_>,
) -> Result<SparseDescriptorMap<'m, M>, BootError>
where
    M: PhysMapper,
    A: NodeFrameAlloc,
    N: NodeLookup + ?Sized,
{
    let max_pfn = state.bounds().max_low_pfn();
    let layout = VmemMapLayout::place(max_pfn).ok_or(BootError::VmemMapTooLarge { max_pfn })?;
    let end = layout.base() + layout.size;
    if let Some(vlpt) = state.vlpt()
        && vlpt.overlaps(layout.base(), end)
    {
        return Err(BootError::VmemMapOverlapsVlpt {
            start: layout.base(),
            end,
        });
    }

    let map = SparseDescriptorMap::new(table, layout);
    let mut backed = 0;
    fw.walk(|start, end| {
        backed += map.materialize_range(
            &mut *alloc,
            nodes,
            PhysicalAddress::new(start),
            PhysicalAddress::new(end),
        )?;
        Ok::<_, VmemMapError>(())
    })?;
    debug!("vmem_map: {backed} pages backed");

    let zero = alloc
        .alloc_node_page(NodeId::BOOT)
        .ok_or(BootError::OutOfMemory("zero page"))?;
    table.zero_page(zero);
    state.set_zero_page(zero)?;
    state.set_vmem_map(layout)?;

    info!(
        "Virtual mem_map starts at {}, vmalloc ends at {}",
        layout.base(),
        state.vmalloc_end()
    );
    Ok(map)
}
