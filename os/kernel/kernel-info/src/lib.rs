//! # Kernel Memory Layout and Boot Interface
//!
//! Compile-time layout constants for the IA-64 memory bootstrap and the
//! firmware memory-map format handed over by the boot loader.
//!
//! ## Overview
//!
//! Everything that must agree between the page-table code, the descriptor
//! map, the gate installer and process setup lives here, so the arithmetic
//! that relates them can be checked once at compile time.
//!
//! ### Memory Layout ([`memory`])
//! * **Page geometry**: 16 KiB base pages, 8-byte entries, four table levels
//! * **Regions**: gate/vmalloc region 5, identity-mapped kernel region 7
//! * **Fixed user-visible window**: the gate pages at the base of region 5
//! * **Per-region limits**: the largest mappable offset and the stack cap
//!
//! ### Boot Information ([`boot`])
//! * **Memory map handoff**: pointer, length and stride of the firmware map
//! * **Descriptor parsing**: typed view over raw descriptor bytes
//! * **Extent walk**: usable, page-trimmed, merged physical ranges
//!
//! ## Virtual Address Space
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌──────────────────────────────┐ region 0..4
//!                       │ user space (NaT page at 0)   │
//! 0xA000_0000_0000_0000 ├──────────────────────────────┤ region 5
//!                       │ gate window (2 × 256 KiB)    │ GATE_ADDR
//!                       │ ...                          │
//!                       │ vmalloc                      │ VMALLOC_START
//!                       │ virtual descriptor map       │ (top of vmalloc)
//!                       │ ...                          │
//!                       │ VLPT                         │ 2^61 − 2^vmlpt_bits
//! 0xC000_0000_0000_0000 ├──────────────────────────────┤ region 6 (uncached)
//! 0xE000_0000_0000_0000 ├──────────────────────────────┤ region 7
//!                       │ identity map of physical RAM │ PAGE_OFFSET
//! 0xFFFF_FFFF_FFFF_FFFF └──────────────────────────────┘
//! ```
//!
//! The virtual linear page table is placed per region at the top of the
//! region offset range; see `kernel-vmem`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
