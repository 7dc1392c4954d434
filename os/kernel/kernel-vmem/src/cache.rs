//! Instruction-cache coherency for pages that become executable.
//!
//! [`PageFlags::ARCH_1`] on a descriptor means "i-cache already coherent with
//! d-cache for this page". It is set after a flush, and by DMA completion,
//! since DMA writes are i-cache coherent.

use kernel_info::memory::{PAGE_OFFSET, PAGE_SIZE};
use kernel_memory_addresses::{PageFrameNumber, PhysicalAddress, VirtualAddress};
use log::trace;

use crate::descriptor::{DescriptorStore, PageFlags};
use crate::page_table::Pte;

/// Cache maintenance primitives provided by the platform.
pub trait CacheMaintenance {
    /// Make instruction fetches of `[start, end)` observe prior data writes.
    fn flush_icache_range(&mut self, start: VirtualAddress, end: VirtualAddress);
}

impl<C: CacheMaintenance + ?Sized> CacheMaintenance for &mut C {
    fn flush_icache_range(&mut self, start: VirtualAddress, end: VirtualAddress) {
        (**self).flush_icache_range(start, end);
    }
}

/// Kernel identity-mapped address of `pa`.
#[inline]
#[must_use]
pub const fn kernel_address(pa: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::new(PAGE_OFFSET + pa.as_u64())
}

/// Flush the i-cache over the page `pte` maps unless it is already clean.
///
/// Returns `true` if a flush was issued. Pages without a descriptor are left
/// alone.
pub fn sync_instruction_cache_with_data<S, C>(store: &S, cache: &mut C, pte: Pte) -> bool
where
    S: DescriptorStore + ?Sized,
    C: CacheMaintenance + ?Sized,
{
    let Some(desc) = store.descriptor(pte.pfn()) else {
        return false;
    };
    if desc.test(PageFlags::ARCH_1) {
        return false;
    }

    let start = kernel_address(pte.page().base());
    cache.flush_icache_range(start, start + PAGE_SIZE);
    desc.set_flags(PageFlags::ARCH_1);
    true
}

/// Mark every page overlapping `[paddr, paddr + size)` as i-cache clean.
///
/// A zero `size` still marks the page containing `paddr`; a range running
/// past the end of physical memory stops at the last page.
pub fn mark_dma_page_clean<S: DescriptorStore + ?Sized>(store: &S, paddr: PhysicalAddress, size: u64) {
    let first = paddr.pfn();
    let last = PageFrameNumber::containing(PhysicalAddress::new(
        paddr.as_u64().saturating_add(size.saturating_sub(1)),
    ));

    for pfn in first.as_u64()..=last.as_u64() {
        if let Some(desc) = store.descriptor(PageFrameNumber::new(pfn)) {
            desc.set_flags(PageFlags::ARCH_1);
        }
    }
    trace!("dma clean: {first}..={last}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FlatDescriptorMap, PageDescriptor};
    use crate::page_table::prot::PAGE_KERNEL;
    use alloc::vec::Vec;
    use kernel_memory_addresses::PhysicalPage;

    #[derive(Default)]
    struct Recorder(Vec<(VirtualAddress, VirtualAddress)>);

    impl CacheMaintenance for Recorder {
        fn flush_icache_range(&mut self, start: VirtualAddress, end: VirtualAddress) {
            self.0.push((start, end));
        }
    }

    fn descriptors(n: usize) -> Vec<PageDescriptor> {
        (0..n).map(|_| PageDescriptor::new()).collect()
    }

    #[test]
    fn flushes_once_per_page() {
        let backing = descriptors(4);
        let map = FlatDescriptorMap::new(PageFrameNumber::new(0), &backing);
        let page = PhysicalPage::from_addr(PhysicalAddress::new(2 * PAGE_SIZE));
        let pte = Pte::make(page, PAGE_KERNEL);
        let mut cache = Recorder::default();

        assert!(sync_instruction_cache_with_data(&map, &mut cache, pte));
        assert!(!sync_instruction_cache_with_data(&map, &mut cache, pte));

        let start = VirtualAddress::new(PAGE_OFFSET + 2 * PAGE_SIZE);
        assert_eq!(cache.0, [(start, start + PAGE_SIZE)]);
        assert!(backing[2].view().test(PageFlags::ARCH_1));
    }

    #[test]
    fn dma_marks_every_touched_page() {
        let backing = descriptors(8);
        let map = FlatDescriptorMap::new(PageFrameNumber::new(0), &backing);

        // two pages starting mid-page touch pages 1, 2 and 3
        mark_dma_page_clean(&map, PhysicalAddress::new(PAGE_SIZE + 100), PAGE_SIZE * 2);
        let clean: Vec<bool> = backing
            .iter()
            .map(|d| d.view().test(PageFlags::ARCH_1))
            .collect();
        assert_eq!(clean, [false, true, true, true, false, false, false, false]);
    }

    #[test]
    fn dma_range_at_the_top_of_memory_stops_at_the_last_page() {
        let backing = descriptors(2);
        let top = PhysicalAddress::new(u64::MAX).pfn();
        let map = FlatDescriptorMap::new(PageFrameNumber::new(top.as_u64() - 1), &backing);

        mark_dma_page_clean(&map, PhysicalAddress::new(u64::MAX - 0x3FFF), 0x10000);
        assert!(!backing[0].view().test(PageFlags::ARCH_1));
        assert!(backing[1].view().test(PageFlags::ARCH_1));

        mark_dma_page_clean(&map, PhysicalAddress::new(u64::MAX - 2 * PAGE_SIZE + 1), u64::MAX);
        assert!(backing[0].view().test(PageFlags::ARCH_1));
    }

    #[test]
    fn dma_zero_size_marks_one_page() {
        let backing = descriptors(4);
        let map = FlatDescriptorMap::new(PageFrameNumber::new(0), &backing);
        mark_dma_page_clean(&map, PhysicalAddress::new(3 * PAGE_SIZE), 0);
        assert!(backing[3].view().test(PageFlags::ARCH_1));
        assert!(!backing[2].view().test(PageFlags::ARCH_1));
    }
}
