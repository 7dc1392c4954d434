//! # Kernel Memory Bring-Up
//!
//! Ties the bootstrap crates together into the boot-time memory sequence of
//! an IA-64 kernel: VLPT sizing on every CPU, physical memory registration,
//! the virtual descriptor map, zone initialization, and finally the gate
//! window and fsyscall table.
//!
//! One-time results live in an [`MmState`]; the kernel uses [`MM`]. Every
//! step reports failures as a [`BootError`]; pass results through
//! [`halt_on_fatal`] where boot cannot go on.

#![cfg_attr(not(test), no_std)]

mod error;
pub mod mm;
mod state;

pub use crate::error::{BootError, halt_on_fatal};
pub use crate::mm::{
    DescriptorHotplug, EINVAL, ENOMEM, MemInitConfig, MemInitReport, MemMap, SyscallTables,
    fill_fsyscall_table, mem_init, memmap_init, mmu_init, paging_init, register_memory,
};
pub use crate::state::{MM, MmState};
