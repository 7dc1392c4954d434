use kernel_alloc::HotplugBackend;
use kernel_memory_addresses::{NodeId, PageFrameNumber};
use kernel_vmem::descriptor::{InitContext, MigrateType, Zone, ZoneInit};
use kernel_vmem::{
    DescriptorStore, NodeFrameAlloc, PageFlags, PhysMapper, SparseDescriptorMap, VmemMapError,
};
use log::{debug, warn};

/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Invalid argument.
pub const EINVAL: i32 = 22;

/// Hot-add backed by the virtual descriptor map.
///
/// Added frames get descriptor storage and start out reserved until onlined.
/// Removal only marks descriptors reserved; their storage stays mapped.
pub struct DescriptorHotplug<'a, 'm, M: PhysMapper, A: NodeFrameAlloc> {
    map: &'a SparseDescriptorMap<'m, M>,
    alloc: &'a mut A,
    zone: Zone,
}

impl<'a, 'm, M: PhysMapper, A: NodeFrameAlloc> DescriptorHotplug<'a, 'm, M, A> {
    /// Hot-added memory lands in [`Zone::Movable`].
    #[must_use]
    pub const fn new(map: &'a SparseDescriptorMap<'m, M>, alloc: &'a mut A) -> Self {
        Self {
            map,
            alloc,
            zone: Zone::Movable,
        }
    }

    #[must_use]
    pub const fn with_zone(mut self, zone: Zone) -> Self {
        self.zone = zone;
        self
    }
}

impl<M: PhysMapper, A: NodeFrameAlloc> HotplugBackend for DescriptorHotplug<'_, '_, M, A> {
    fn add_pages(&mut self, node: NodeId, start: PageFrameNumber, nr_pages: u64) -> Result<(), i32> {
        let limit = self.map.limit();
        let end = match start.as_u64().checked_add(nr_pages) {
            Some(end) if end <= limit.as_u64() => PageFrameNumber::new(end),
            _ => {
                warn!("hotplug: {nr_pages} frames from {start} reach past the descriptor map limit {limit}");
                return Err(-EINVAL);
            }
        };
        self.map
            .materialize_range(&mut *self.alloc, &node, start.start_address(), end.start_address())
            .map_err(|e| {
                warn!("hotplug: {e}");
                match e {
                    VmemMapError::OutOfRange { .. } => -EINVAL,
                    VmemMapError::Walk(_) => -ENOMEM,
                }
            })?;

        let args = ZoneInit {
            node,
            zone: self.zone,
            migrate: MigrateType::Movable,
            context: InitContext::Hotplug,
        };
        let done = self.map.init_range(start, nr_pages, &args);
        debug!("hotplug: {done} descriptors from {start} on {node:?}");
        Ok(())
    }

    fn remove_pages(&mut self, start: PageFrameNumber, nr_pages: u64) {
        let mut marked = 0;
        for i in 0..nr_pages {
            if let Some(d) = self.map.descriptor(start + i) {
                d.set_flags(PageFlags::RESERVED);
                marked += 1;
            }
        }
        debug!("hotplug: {marked} of {nr_pages} frames from {start} taken offline");
    }
}
