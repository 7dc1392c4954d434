use kernel_info::boot::FirmwareMemoryMap;
use kernel_memory_addresses::{NodeId, PageFrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::descriptor::{DescriptorView, FlatDescriptorMap, Zone, ZoneInit};
use kernel_vmem::{DescriptorStore, PfnSpan, PhysMapper, SparseDescriptorMap};
use log::debug;

/// The kernel's page descriptors.
pub enum MemMap<'m, M: PhysMapper> {
    /// Sparse map in vmalloc space.
    Virtual(SparseDescriptorMap<'m, M>),
    /// Dense array for contiguous memory.
    Flat(FlatDescriptorMap<'m>),
}

impl<M: PhysMapper> MemMap<'_, M> {
    /// Base of the virtual map, if that is the one in use.
    #[must_use]
    pub const fn virtual_memmap(&self) -> Option<VirtualAddress> {
        match self {
            Self::Virtual(map) => Some(map.base()),
            Self::Flat(_) => None,
        }
    }
}

impl<M: PhysMapper> DescriptorStore for MemMap<'_, M> {
    fn descriptor(&self, pfn: PageFrameNumber) -> Option<DescriptorView<'_>> {
        match self {
            Self::Virtual(map) => map.descriptor(pfn),
            Self::Flat(map) => map.descriptor(pfn),
        }
    }

    fn is_pfn_valid(&self, pfn: PageFrameNumber) -> bool {
        match self {
            Self::Virtual(map) => map.is_pfn_valid(pfn),
            Self::Flat(map) => map.is_pfn_valid(pfn),
        }
    }
}

/// Initialize the descriptors of `zone` on `node`. Returns how many were set up.
///
/// A flat map is initialized over the zone directly. A virtual map is
/// initialized per firmware extent, each widened to the whole descriptor
/// pages it touches.
#[must_use]
pub fn memmap_init<M: PhysMapper>(
    map: &MemMap<'_, M>,
    fw: &FirmwareMemoryMap<'_>,
    zone: PfnSpan,
    node: NodeId,
    kind: Zone,
) -> u64 {
    let args = ZoneInit::early(node, kind);
    let done = match map {
        MemMap::Flat(flat) => flat.init_range(zone.start, zone.end - zone.start, &args),
        MemMap::Virtual(sparse) => fw
            .extents()
            .map(|ext| {
                sparse.finish_zone_init(
                    PhysicalAddress::new(ext.start),
                    PhysicalAddress::new(ext.end),
                    zone,
                    &args,
                )
            })
            .sum::<u64>(),
    };
    debug!("memmap_init: {kind:?} on {node:?} {}..{}: {done} descriptors", zone.start, zone.end);
    done
}
