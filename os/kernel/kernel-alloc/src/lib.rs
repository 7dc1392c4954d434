//! # Boot Physical Memory
//!
//! Everything between the firmware memory map and a working page allocator:
//!
//! ```text
//! firmware extents ──► RangeRegistrar ──► MemBlock ──► NodeFrameAlloc
//!        │              (crash carve-out)   (memory / reserved tables)
//!        └──► PfnBounds (min/max PFN)
//! ```
//!
//! ## Core Components
//!
//! * [`memblock`]: the early node-aware allocator. Hands out single pages
//!   to the kernel page-table walker and the descriptor map, and takes
//!   reserved ranges back.
//! * [`ranges`]: registration of firmware extents and the PFN watermarks.
//! * [`hotplug`]: validated hot-add / hot-remove.
//! * [`release`]: freeing the init sections and the initial ramdisk.
//!
//! Nothing here allocates from a heap; [`MemBlock`](memblock::MemBlock)
//! stores its tables inline and can live in a static.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod hotplug;
pub mod memblock;
pub mod ranges;
pub mod release;

pub use crate::hotplug::{HotplugBackend, HotplugError, add_memory, remove_memory};
pub use crate::memblock::{MemBlock, MemBlockError, MemRegion};
pub use crate::ranges::{PfnBounds, RangeRegistrar};
pub use crate::release::ReleaseReserved;
