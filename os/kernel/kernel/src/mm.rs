//! Memory-management bring-up, in boot order:
//!
//! 1. [`mmu_init`]: on every CPU, size and activate the VLPT.
//! 2. [`paging_init`]: place the descriptor map and back it for every
//!    firmware extent.
//! 3. [`memmap_init`]: per zone, initialize the descriptors.
//! 4. [`mem_init`]: release boot memory, patch the fsyscall table, install
//!    the gate.

mod hotplug;
mod mem_init;
mod memmap;
mod mmu;
mod paging;

pub use hotplug::{DescriptorHotplug, EINVAL, ENOMEM};
pub use mem_init::{MemInitConfig, MemInitReport, SyscallTables, fill_fsyscall_table, mem_init};
pub use memmap::{MemMap, memmap_init};
pub use mmu::mmu_init;
pub use paging::{paging_init, register_memory};
