//! Returning boot-reserved memory: the init sections and the initial ramdisk.

use kernel_info::memory::{PAGE_OFFSET, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress, align_down, align_up};
use kernel_vmem::DescriptorStore;
use log::{info, warn};

use crate::memblock::MemBlock;

/// Something that takes reserved pages back.
pub trait ReleaseReserved {
    /// Free the whole pages of `[start, end)`. Returns the bytes freed.
    fn release(&mut self, start: PhysicalAddress, end: PhysicalAddress) -> u64;
}

impl ReleaseReserved for MemBlock {
    fn release(&mut self, start: PhysicalAddress, end: PhysicalAddress) -> u64 {
        match self.free_reserved_range(start, end) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("release: [{start}, {end}) kept reserved: {e}");
                0
            }
        }
    }
}

/// Physical address behind an identity-mapped kernel address.
const fn identity_pa(va: VirtualAddress) -> Option<PhysicalAddress> {
    if va.as_u64() < PAGE_OFFSET {
        return None;
    }
    Some(PhysicalAddress::new(va.as_u64() - PAGE_OFFSET))
}

/// Free the initial ramdisk at kernel addresses `[start, end)`.
///
/// The firmware may place the ramdisk in a page shared with the kernel
/// image, so only pages wholly inside the range are freed: the start is
/// rounded up and the end down. Pages without a descriptor are skipped.
/// Returns the bytes freed.
pub fn free_initrd_mem<R, S>(release: &mut R, valid: &S, start: VirtualAddress, end: VirtualAddress) -> u64
where
    R: ReleaseReserved + ?Sized,
    S: DescriptorStore + ?Sized,
{
    let start = align_up(start.as_u64(), PAGE_SIZE);
    let end = align_down(end.as_u64(), PAGE_SIZE);
    if start >= end {
        return 0;
    }
    info!("Freeing initrd memory: {}kB freed", (end - start) >> 10);

    let mut freed = 0;
    let mut va = start;
    while va < end {
        if let Some(pa) = identity_pa(VirtualAddress::new(va))
            && valid.is_pfn_valid(pa.pfn())
        {
            freed += release.release(pa, pa + PAGE_SIZE);
        }
        va += PAGE_SIZE;
    }
    freed
}

/// Free the kernel's init sections at kernel addresses `[start, end)`.
pub fn free_initmem<R: ReleaseReserved + ?Sized>(release: &mut R, start: VirtualAddress, end: VirtualAddress) -> u64 {
    let (Some(lo), Some(hi)) = (identity_pa(start), identity_pa(end)) else {
        warn!("free_initmem: [{start}, {end}) is not identity mapped");
        return 0;
    };
    let freed = release.release(lo, hi);
    info!("Freeing unused kernel memory: {}K", freed >> 10);
    freed
}
