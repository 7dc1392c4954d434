//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses, page bases and page frame
//! numbers used by the IA-64 memory bootstrap code.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Physical memory, page-aligned bases of size `S`. |
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Region-qualified virtual memory. |
//! | [`PageFrameNumber`] | Index of one kernel base page in physical memory. |
//! | [`NodeId`] | NUMA node that owns a physical range. |
//!
//! ## Regions
//!
//! IA-64 splits the 64-bit virtual address space into eight regions selected
//! by bits 63..61. Each region is translated independently; the kernel uses
//! region 5 for page-table mapped kernel memory (gate page, vmalloc, the
//! virtual descriptor map) and region 7 for the identity-mapped view of
//! physical memory.
//!
//! ```text
//! | 63‒61  | 60‒0                     |
//! | region | offset within the region |
//! ```
//!
//! ## Page Sizes
//!
//! - [`Size16K`] — kernel base page (`PAGE_SHIFT = 14`)
//! - [`Size256K`] — per-CPU page, also the gate window stride
//! - [`Size16M`] — identity-mapping granule
//! - [`Size256M`] — huge-page region page size
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xA000_0000_0000_4123);
//! assert_eq!(va.region(), 5);
//! let (page, off) = va.split::<Size16K>();
//! assert_eq!(page.base().as_u64(), 0xA000_0000_0000_4000);
//! assert_eq!(off, 0x123);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod node;
mod page;
mod page_size;
mod pfn;
mod physical_address;
mod virtual_address;

pub use crate::node::NodeId;
pub use crate::page::{PhysicalPage, VirtualPage};
pub use crate::page_size::{KernelPageSize, PageSize, Size16K, Size16M, Size256K, Size256M};
pub use crate::pfn::PageFrameNumber;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Number of address bits below the region selector.
pub const REGION_SHIFT: u32 = 61;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x4fff, 0x4000), 0x4000);
/// assert_eq!(align_down(0x4000, 0x4000), 0x4000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 0x4000), 0x4000);
/// assert_eq!(align_up(0x4000, 0x4000), 0x4000);
/// assert_eq!(align_up(0x12345, 16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}

/// Base address of region `rgn`.
#[inline]
#[must_use]
pub const fn region_base(rgn: u64) -> u64 {
    rgn << REGION_SHIFT
}
