#![allow(dead_code)]

use std::cell::UnsafeCell;

use kernel_alloc::{MemBlock, RangeRegistrar};
use kernel_info::boot::{EFI_MEMORY_WB, FirmwareMemoryMap};
use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};
use kernel_memory_addresses::{NodeId, PhysicalAddress};
use kernel_vmem::{KernelPageTable, PhysMapper, SingleNode, SparseDescriptorMap};
use kernel::{MmState, paging_init, register_memory};

pub const MIB: u64 = 1 << 20;

/// Stride firmware uses between records; larger than the decoded part.
pub const DESC_STRIDE: usize = 48;

const CONVENTIONAL: u32 = 7;
const RUNTIME_DATA: u32 = 6;

#[repr(C, align(16384))]
struct Frame(UnsafeCell<[u8; PAGE_SIZE as usize]>);

/// Physical memory `[0, frames * PAGE_SIZE)`.
pub struct TestPhys {
    frames: Vec<Frame>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n)
                .map(|_| Frame(UnsafeCell::new([0u8; PAGE_SIZE as usize])))
                .collect(),
        }
    }

    pub fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        // SAFETY: test memory, single thread.
        unsafe { *self.phys_to_mut::<u64>(pa) }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = (pa.as_u64() >> PAGE_SHIFT) as usize;
        let off = (pa.as_u64() & (PAGE_SIZE - 1)) as usize;
        assert!(idx < self.frames.len(), "{pa} outside test memory");
        // SAFETY: in bounds; caller promises the type.
        unsafe { &mut *self.frames[idx].0.get().cast::<u8>().add(off).cast::<T>() }
    }
}

/// Encode firmware memory descriptors `(type, start, bytes)`.
pub fn firmware_map(entries: &[(u32, u64, u64)]) -> Vec<u8> {
    let mut buf = vec![0u8; entries.len() * DESC_STRIDE];
    for (rec, &(ty, start, bytes)) in buf.chunks_exact_mut(DESC_STRIDE).zip(entries) {
        rec[0..4].copy_from_slice(&ty.to_le_bytes());
        rec[8..16].copy_from_slice(&start.to_le_bytes());
        rec[24..32].copy_from_slice(&(bytes >> 12).to_le_bytes());
        rec[32..40].copy_from_slice(&EFI_MEMORY_WB.to_le_bytes());
    }
    buf
}

/// Usable `[0, 1 MiB)` and `[1.5 MiB, 2 MiB)` with runtime data in between.
pub fn two_extent_map() -> Vec<u8> {
    firmware_map(&[
        (CONVENTIONAL, 0, MIB),
        (RUNTIME_DATA, MIB, MIB / 2),
        (CONVENTIONAL, MIB + MIB / 2, MIB / 2),
    ])
}

/// Frames covering [`two_extent_map`].
pub const TEST_FRAMES: usize = (2 * MIB / PAGE_SIZE) as usize;

/// Everything up to and including `paging_init`.
pub fn boot<'m>(
    state: &MmState,
    phys: &'m TestPhys,
    memblock: &mut MemBlock,
    fw: &FirmwareMemoryMap<'_>,
) -> (KernelPageTable<'m, TestPhys>, SparseDescriptorMap<'m, TestPhys>) {
    let mut registrar = RangeRegistrar::new();
    register_memory(state, memblock, &mut registrar, fw, &SingleNode).unwrap();
    let table = KernelPageTable::create(phys, memblock, NodeId::BOOT).unwrap();
    let map = paging_init(state, table, memblock, &SingleNode, fw).unwrap();
    (table, map)
}
