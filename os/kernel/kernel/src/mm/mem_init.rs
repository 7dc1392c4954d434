use kernel_alloc::MemBlock;
use kernel_memory_addresses::{PageFrameNumber, VirtualAddress};
use kernel_vmem::{CacheMaintenance, GateImage, KernelPageTable, PhysMapper, install_gate};
use log::info;

use crate::{BootError, MmState};

/// Boot options that affect [`mem_init`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemInitConfig {
    /// Route every system call through the heavyweight path.
    pub nolwsys: bool,
}

/// The light-weight (fsyscall) and regular system call tables.
pub struct SyscallTables<'a> {
    pub fsyscall: &'a mut [u64],
    pub syscall: &'a [u64],
}

/// What [`mem_init`] set up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemInitReport {
    pub max_mapnr: PageFrameNumber,
    pub high_memory: VirtualAddress,
    pub free_bytes: u64,
    /// fsyscall slots redirected to the heavyweight handler.
    pub heavyweight_slots: usize,
}

/// Point empty fsyscall slots at the regular handler, tagged with bit 0.
/// With `nolwsys` every slot is redirected. Returns the slots written.
pub fn fill_fsyscall_table(fsyscall: &mut [u64], syscall: &[u64], nolwsys: bool) -> usize {
    let mut written = 0;
    for (slot, &handler) in fsyscall.iter_mut().zip(syscall) {
        if *slot == 0 || nolwsys {
            *slot = handler | 1;
            written += 1;
        }
    }
    written
}

/// Final memory bring-up: fix `max_mapnr`, patch the fsyscall table and map
/// the gate.
///
/// # Errors
/// - [`BootError::AlreadyInitialized`] on a second call.
/// - [`BootError::NotInitialized`] if [`paging_init`](super::paging_init)
///   has not allocated the zero page.
/// - [`BootError::Gate`] if the gate cannot be installed.
pub fn mem_init<M, C>(
    state: &MmState,
    config: MemInitConfig,
    table: &KernelPageTable<'_, M>,
    memblock: &mut MemBlock,
    tables: SyscallTables<'_>,
    gate: &GateImage<'_>,
    cache: &mut C,
) -> Result<MemInitReport, BootError>
where
    M: PhysMapper,
    C: CacheMaintenance + ?Sized,
{
    let zero = state.zero_page().ok_or(BootError::NotInitialized("zero page"))?;
    let max_mapnr = state.bounds().max_low_pfn();
    state.set_max_mapnr(max_mapnr)?;
    let high_memory = state
        .high_memory()
        .ok_or(BootError::NotInitialized("max_mapnr"))?;

    let free_bytes = memblock.free_memory();
    info!(
        "Memory: {}K/{}K available",
        free_bytes >> 10,
        memblock.total_memory() >> 10
    );

    let heavyweight_slots = fill_fsyscall_table(tables.fsyscall, tables.syscall, config.nolwsys);
    if config.nolwsys {
        info!("nolwsys: all {heavyweight_slots} light-weight syscalls disabled");
    }

    install_gate(table, memblock, gate, zero, cache)?;

    Ok(MemInitReport {
        max_mapnr,
        high_memory,
        free_bytes,
        heavyweight_slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slots_get_tagged_handler() {
        let mut fsys = [0, 0x5000, 0];
        let sys = [0x1000, 0x2000, 0x3000];
        assert_eq!(fill_fsyscall_table(&mut fsys, &sys, false), 2);
        assert_eq!(fsys, [0x1001, 0x5000, 0x3001]);
    }

    #[test]
    fn nolwsys_redirects_everything() {
        let mut fsys = [0x4000, 0x5000];
        let sys = [0x1000, 0x2000];
        assert_eq!(fill_fsyscall_table(&mut fsys, &sys, true), 2);
        assert_eq!(fsys, [0x1001, 0x2001]);
    }

    #[test]
    fn shorter_table_bounds_the_fill() {
        let mut fsys = [0; 4];
        assert_eq!(fill_fsyscall_table(&mut fsys, &[0x10], false), 1);
        assert_eq!(fsys, [0x11, 0, 0, 0]);
    }
}
