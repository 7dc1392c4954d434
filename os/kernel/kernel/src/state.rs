//! Process-wide memory-management singletons.
//!
//! Each value is written once during boot and only read afterwards.

use kernel_alloc::PfnBounds;
use kernel_info::memory::{PAGE_OFFSET, PAGE_SHIFT, VMALLOC_END_INIT};
use kernel_memory_addresses::{KernelPageSize, PageFrameNumber, PhysicalPage, VirtualAddress};
use kernel_sync::SyncOnceCell;
use kernel_vmem::{VlptConfig, VmemMapLayout};

use crate::BootError;

pub struct MmState {
    vlpt: SyncOnceCell<VlptConfig>,
    vmem_map: SyncOnceCell<VmemMapLayout>,
    zero_page: SyncOnceCell<PhysicalPage<KernelPageSize>>,
    max_mapnr: SyncOnceCell<PageFrameNumber>,
    bounds: PfnBounds,
}

/// The kernel's instance.
pub static MM: MmState = MmState::new();

fn record<T>(cell: &SyncOnceCell<T>, value: T, what: &'static str) -> Result<(), BootError> {
    cell.set(value)
        .map_err(|_| BootError::AlreadyInitialized(what))
}

impl Default for MmState {
    fn default() -> Self {
        Self::new()
    }
}

impl MmState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vlpt: SyncOnceCell::new(),
            vmem_map: SyncOnceCell::new(),
            zero_page: SyncOnceCell::new(),
            max_mapnr: SyncOnceCell::new(),
            bounds: PfnBounds::new(),
        }
    }

    /// VLPT placement chosen by the boot CPU.
    #[must_use]
    pub fn vlpt(&self) -> Option<&VlptConfig> {
        self.vlpt.get()
    }

    /// Record the boot CPU's layout, or check another CPU against it.
    pub(crate) fn agree_vlpt(&self, cfg: VlptConfig) -> Result<(), BootError> {
        let boot = self.vlpt.get_or_init(|| cfg);
        if boot.impl_va_bits() == cfg.impl_va_bits() {
            Ok(())
        } else {
            Err(BootError::VlptMismatch {
                boot: boot.impl_va_bits(),
                this: cfg.impl_va_bits(),
            })
        }
    }

    /// Placement of the virtual descriptor map, when one is in use.
    #[must_use]
    pub fn vmem_map(&self) -> Option<&VmemMapLayout> {
        self.vmem_map.get()
    }

    pub(crate) fn set_vmem_map(&self, layout: VmemMapLayout) -> Result<(), BootError> {
        record(&self.vmem_map, layout, "vmem map")
    }

    /// End of vmalloc space; lowered when the descriptor map is placed.
    #[must_use]
    pub fn vmalloc_end(&self) -> VirtualAddress {
        self.vmem_map()
            .map_or(VirtualAddress::new(VMALLOC_END_INIT), VmemMapLayout::base)
    }

    /// The shared zero page.
    #[must_use]
    pub fn zero_page(&self) -> Option<PhysicalPage<KernelPageSize>> {
        self.zero_page.get().copied()
    }

    pub(crate) fn set_zero_page(&self, page: PhysicalPage<KernelPageSize>) -> Result<(), BootError> {
        record(&self.zero_page, page, "zero page")
    }

    #[must_use]
    pub fn max_mapnr(&self) -> Option<PageFrameNumber> {
        self.max_mapnr.get().copied()
    }

    pub(crate) fn set_max_mapnr(&self, pfn: PageFrameNumber) -> Result<(), BootError> {
        record(&self.max_mapnr, pfn, "max_mapnr")
    }

    /// First kernel address past directly mapped memory.
    #[must_use]
    pub fn high_memory(&self) -> Option<VirtualAddress> {
        self.max_mapnr()
            .map(|pfn| VirtualAddress::new(PAGE_OFFSET + (pfn.as_u64() << PAGE_SHIFT)))
    }

    /// Global PFN watermarks.
    #[must_use]
    pub const fn bounds(&self) -> &PfnBounds {
        &self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_time_values() {
        let mm = MmState::new();
        assert_eq!(mm.vmalloc_end(), VirtualAddress::new(VMALLOC_END_INIT));
        assert!(mm.high_memory().is_none());

        mm.set_max_mapnr(PageFrameNumber::new(4)).unwrap();
        assert_eq!(
            mm.set_max_mapnr(PageFrameNumber::new(8)),
            Err(BootError::AlreadyInitialized("max_mapnr"))
        );
        assert_eq!(mm.max_mapnr(), Some(PageFrameNumber::new(4)));
        assert_eq!(mm.high_memory(), Some(VirtualAddress::new(PAGE_OFFSET + 4 * 16384)));
    }

    #[test]
    fn vlpt_must_agree_across_cpus() {
        let mm = MmState::new();
        mm.agree_vlpt(VlptConfig::compute(51).unwrap()).unwrap();
        mm.agree_vlpt(VlptConfig::compute(51).unwrap()).unwrap();
        assert_eq!(
            mm.agree_vlpt(VlptConfig::compute(55).unwrap()),
            Err(BootError::VlptMismatch { boot: 51, this: 55 })
        );
    }
}
