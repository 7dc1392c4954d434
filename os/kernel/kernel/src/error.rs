//! Boot failure taxonomy.

use kernel_alloc::MemBlockError;
use kernel_info::boot::MemoryMapError;
use kernel_memory_addresses::{PageFrameNumber, VirtualAddress};
use kernel_vmem::{GateError, VlptError, VmemMapError, WalkError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Vlpt(#[from] VlptError),
    #[error("CPU implements {this} VA bits but the boot CPU implements {boot}")]
    VlptMismatch { boot: u32, this: u32 },
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    VmemMap(#[from] VmemMapError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    MemBlock(#[from] MemBlockError),
    #[error(transparent)]
    MemoryMap(#[from] MemoryMapError),
    #[error("descriptor map for {max_pfn} frames does not fit in vmalloc space")]
    VmemMapTooLarge { max_pfn: PageFrameNumber },
    #[error("descriptor map [{start}, {end}) overlaps the virtual linear page table")]
    VmemMapOverlapsVlpt {
        start: VirtualAddress,
        end: VirtualAddress,
    },
    #[error("no memory for the {0}")]
    OutOfMemory(&'static str),
    #[error("{0} initialized twice")]
    AlreadyInitialized(&'static str),
    #[error("{0} used before it was initialized")]
    NotInitialized(&'static str),
}

impl BootError {
    /// Whether boot cannot continue.
    ///
    /// Only a repeated one-time initialization is survivable: the first
    /// value stays in place.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadyInitialized(_))
    }
}

/// Halt on a fatal error; hand back anything else.
///
/// # Errors
/// Non-fatal errors are returned unchanged.
///
/// # Panics
/// On a fatal error, with its full diagnostic.
pub fn halt_on_fatal<T>(result: Result<T, BootError>) -> Result<T, BootError> {
    match result {
        Err(e) if e.is_fatal() => panic!("fatal boot error: {e}"),
        other => other,
    }
}
