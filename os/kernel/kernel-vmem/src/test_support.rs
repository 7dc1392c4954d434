//! Simulated physical memory for unit tests.

use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};
use kernel_memory_addresses::{KernelPageSize, NodeId, PhysicalAddress, PhysicalPage};

use crate::{NodeFrameAlloc, PhysMapper};

/// A 16 KiB-aligned raw frame.
#[repr(C, align(16384))]
pub struct Frame(UnsafeCell<[u8; PAGE_SIZE as usize]>);

/// "RAM" as a vector of frames; physical addresses are byte offsets from 0.
pub struct TestPhys {
    frames: Vec<Frame>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(Frame(UnsafeCell::new([0u8; PAGE_SIZE as usize])));
        }
        Self { frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Scribble over a frame to prove callers zero what they allocate.
    pub fn poison(&self, idx: usize) {
        // SAFETY: tests are single-threaded per TestPhys.
        unsafe { (*self.frames[idx].0.get()).fill(0xA5) };
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = (pa.as_u64() >> PAGE_SHIFT) as usize;
        let off = (pa.as_u64() & (PAGE_SIZE - 1)) as usize;
        assert!(idx < self.frames.len(), "{pa} outside test memory");
        debug_assert!(off + core::mem::size_of::<T>() <= PAGE_SIZE as usize);
        // SAFETY: in bounds; caller promises the type.
        unsafe { &mut *self.frames[idx].0.get().cast::<u8>().add(off).cast::<T>() }
    }
}

/// Hands out frames in order and poisons them first.
pub struct BumpAlloc<'p> {
    phys: &'p TestPhys,
    next: usize,
    allocated: usize,
}

impl<'p> BumpAlloc<'p> {
    pub fn new(phys: &'p TestPhys) -> Self {
        Self {
            phys,
            next: 0,
            allocated: 0,
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

impl NodeFrameAlloc for BumpAlloc<'_> {
    fn alloc_node_page(&mut self, _node: NodeId) -> Option<PhysicalPage<KernelPageSize>> {
        if self.next >= self.phys.frame_count() {
            return None;
        }
        let idx = self.next;
        self.next += 1;
        self.allocated += 1;
        self.phys.poison(idx);
        Some(PhysicalPage::from_addr(PhysicalAddress::new(
            (idx as u64) << PAGE_SHIFT,
        )))
    }
}
