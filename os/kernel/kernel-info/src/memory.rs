//! # Memory Layout

use kernel_memory_addresses::{
    KernelPageSize, PageSize, REGION_SHIFT, Size16M, Size256K, Size256M, region_base,
};

/// `log2` of the kernel base page size.
pub const PAGE_SHIFT: u32 = KernelPageSize::SHIFT;

/// Kernel base page size in bytes.
pub const PAGE_SIZE: u64 = KernelPageSize::SIZE;

/// Clears the in-page offset of an address.
pub const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// `log2` of the size of one page-table entry.
pub const PTE_BITS: u32 = 3;

/// Index bits consumed by one table level.
pub const TABLE_INDEX_BITS: u32 = PAGE_SHIFT - PTE_BITS;

/// Entries in every table level (one page of 8-byte entries).
pub const PTRS_PER_TABLE: usize = 1 << TABLE_INDEX_BITS;

/// Address bits covered by one leaf table.
pub const PMD_SHIFT: u32 = PAGE_SHIFT + TABLE_INDEX_BITS;
pub const PMD_SIZE: u64 = 1 << PMD_SHIFT;

pub const PUD_SHIFT: u32 = PMD_SHIFT + TABLE_INDEX_BITS;
pub const PUD_SIZE: u64 = 1 << PUD_SHIFT;

pub const PGDIR_SHIFT: u32 = PUD_SHIFT + TABLE_INDEX_BITS;
pub const PGDIR_SIZE: u64 = 1 << PGDIR_SHIFT;

/// Number of address bits below the region selector.
pub const RGN_BITS: u32 = REGION_SHIFT;

/// Region holding the gate window, vmalloc and the descriptor map.
pub const RGN_GATE: u64 = 5;

/// Region used for huge-page mappings.
pub const RGN_HPAGE: u64 = 4;

/// Identity-mapped kernel region.
pub const RGN_KERNEL: u64 = 7;

/// Base of the identity-mapped view of physical memory.
pub const PAGE_OFFSET: u64 = region_base(RGN_KERNEL);

pub const PERCPU_PAGE_SHIFT: u32 = Size256K::SHIFT;
pub const PERCPU_PAGE_SIZE: u64 = Size256K::SIZE;

/// Fixed user-visible address of the gate window.
pub const GATE_ADDR: u64 = region_base(RGN_GATE);

/// First byte of the fixed user-visible window.
pub const FIXADDR_USER_START: u64 = GATE_ADDR;

/// One past the last byte of the fixed user-visible window.
pub const FIXADDR_USER_END: u64 = GATE_ADDR + 2 * PERCPU_PAGE_SIZE;

pub const VMALLOC_START: u64 = region_base(RGN_GATE) + 0x2_0000_0000;

/// End of vmalloc before the descriptor map is carved out of it.
pub const VMALLOC_END_INIT: u64 = region_base(RGN_GATE) + (1 << (4 * PAGE_SHIFT - 9));

/// Granule of the identity mapping.
pub const GRANULE_SHIFT: u32 = Size16M::SHIFT;
pub const GRANULE_SIZE: u64 = Size16M::SIZE;

/// Default huge page size.
pub const HPAGE_SHIFT: u32 = Size256M::SHIFT;

/// Largest mappable offset within a user region.
pub const RGN_MAP_LIMIT: u64 = (1 << (PGDIR_SHIFT + TABLE_INDEX_BITS - 3)) - 2 * PAGE_SIZE;

/// Upper bound for the register backing store / memory stack pair.
pub const MAX_USER_STACK_SIZE: u64 = RGN_MAP_LIMIT / 2;

/// Default top of the user stack (region 3).
pub const DEFAULT_STACK_TOP: u64 = region_base(3) + RGN_MAP_LIMIT;

/// Buddy allocator order limit.
pub const MAX_ORDER: u32 = 17;

/// Pages in the largest buddy block; the descriptor map is sized in multiples of this.
pub const MAX_ORDER_NR_PAGES: u64 = 1 << (MAX_ORDER - 1);

const _: () = {
    assert!(PTRS_PER_TABLE == 2048);
    assert!(PGDIR_SHIFT == 47);
    assert!(FIXADDR_USER_END - FIXADDR_USER_START == 2 * PERCPU_PAGE_SIZE);
    assert!(VMALLOC_START > FIXADDR_USER_END);
    assert!(VMALLOC_END_INIT > VMALLOC_START);
    assert!(PERCPU_PAGE_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(MAX_USER_STACK_SIZE.is_multiple_of(PAGE_SIZE));
};
