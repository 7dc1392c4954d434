//! # Gate Window
//!
//! A fixed window at [`GATE_ADDR`], identical in every process, exposes the
//! kernel's gate page: once read-only for its ELF headers and once
//! execute-only as the `epc` privilege-promotion entry.
//!
//! ```text
//! GATE_ADDR                       + PERCPU_PAGE_SIZE                + 2 × PERCPU_PAGE_SIZE
//! | gate (R) | zero | … | zero   | gate (X) | zero | … | zero      |     Split
//! | gate (R) | gate+1 (X) | zero | …                        | zero |     Contiguous
//! ```
//!
//! Slots not holding gate text map the shared zero page, so the window has
//! no holes. The window's user-visible region is a single static shared by
//! every address space.

use kernel_info::memory::{
    FIXADDR_USER_END, FIXADDR_USER_START, GATE_ADDR, PAGE_SIZE, PERCPU_PAGE_SIZE,
};
use kernel_memory_addresses::{KernelPageSize, NodeId, PhysicalAddress, PhysicalPage, VirtualAddress};
use log::{debug, info};

use crate::cache::{CacheMaintenance, kernel_address};
use crate::page_table::prot::{PAGE_GATE, PAGE_READONLY, PROTECTION_MAP};
use crate::vma::{VmFlags, VmRegion};
use crate::{KernelPageTable, NodeFrameAlloc, PageProt, PhysMapper, WalkError};

/// Page-sized slots in the gate window.
pub const GATE_WINDOW_SLOTS: u64 = (FIXADDR_USER_END - FIXADDR_USER_START) / PAGE_SIZE;

/// How the gate text is laid out in the window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GateLayout {
    /// One image page, mapped at [`GATE_ADDR`] and again one per-CPU page above.
    Split,
    /// Two image pages back to back; the second, given here, is the
    /// execute-only one.
    Contiguous(PhysicalPage<KernelPageSize>),
}

impl GateLayout {
    /// User address of the execute-only alias.
    #[must_use]
    pub const fn execute_base(self) -> VirtualAddress {
        match self {
            Self::Split => VirtualAddress::new(GATE_ADDR + PERCPU_PAGE_SIZE),
            Self::Contiguous(_) => VirtualAddress::new(GATE_ADDR + PAGE_SIZE),
        }
    }

    /// Bytes of gate image that may be patched.
    #[must_use]
    pub const fn image_len(self) -> u64 {
        match self {
            Self::Split => PAGE_SIZE,
            Self::Contiguous(_) => 2 * PAGE_SIZE,
        }
    }
}

/// Address a relocation resolves to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GateSymbol {
    ReadOnlyBase,
    ExecuteBase,
}

/// Store the user address of `target` as a 64-bit word at `offset` in the image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GateRelocation {
    pub offset: u64,
    pub target: GateSymbol,
}

/// The gate text to install.
#[derive(Copy, Clone, Debug)]
pub struct GateImage<'r> {
    /// First (or only) page of gate text.
    pub page: PhysicalPage<KernelPageSize>,
    pub layout: GateLayout,
    pub relocations: &'r [GateRelocation],
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error("gate slot {va} already maps {found}")]
    Conflict {
        va: VirtualAddress,
        found: PhysicalAddress,
    },
    #[error("gate relocation at offset {offset:#x} does not fit a {len:#x}-byte image")]
    BadRelocation { offset: u64, len: u64 },
}

impl GateImage<'_> {
    /// Page and protection for window slot `slot`.
    const fn slot(&self, slot: u64, zero: PhysicalPage<KernelPageSize>) -> (PhysicalPage<KernelPageSize>, PageProt) {
        match (self.layout, slot) {
            (_, 0) => (self.page, PAGE_READONLY),
            (GateLayout::Contiguous(second), 1) => (second, PAGE_GATE),
            (GateLayout::Split, s) if s * PAGE_SIZE == PERCPU_PAGE_SIZE => (self.page, PAGE_GATE),
            _ => (zero, PAGE_READONLY),
        }
    }

    fn resolve(&self, symbol: GateSymbol) -> u64 {
        match symbol {
            GateSymbol::ReadOnlyBase => GATE_ADDR,
            GateSymbol::ExecuteBase => self.layout.execute_base().as_u64(),
        }
    }

    /// Physical address of image byte `offset`.
    const fn image_address(&self, offset: u64) -> PhysicalAddress {
        let page = match self.layout {
            GateLayout::Contiguous(second) if offset >= PAGE_SIZE => second,
            _ => self.page,
        };
        page.join(offset % PAGE_SIZE)
    }

    fn check_relocations(&self) -> Result<(), GateError> {
        let len = self.layout.image_len();
        for r in self.relocations {
            if !r.offset.is_multiple_of(8) || r.offset.saturating_add(8) > len {
                return Err(GateError::BadRelocation { offset: r.offset, len });
            }
        }
        Ok(())
    }
}

/// Map the gate window and patch the gate image for its final addresses.
///
/// Safe to repeat: slots that already hold the intended page are left as is.
///
/// # Errors
/// - [`GateError::BadRelocation`] before anything is mapped.
/// - [`GateError::Walk`] if a table page cannot be allocated.
/// - [`GateError::Conflict`] if a slot maps some other page.
pub fn install_gate<M, A, C>(
    table: &KernelPageTable<'_, M>,
    alloc: &mut A,
    image: &GateImage<'_>,
    zero_page: PhysicalPage<KernelPageSize>,
    cache: &mut C,
) -> Result<(), GateError>
where
    M: PhysMapper,
    A: NodeFrameAlloc,
    C: CacheMaintenance + ?Sized,
{
    image.check_relocations()?;

    for slot in 0..GATE_WINDOW_SLOTS {
        let va = VirtualAddress::new(GATE_ADDR + slot * PAGE_SIZE);
        let (page, prot) = image.slot(slot, zero_page);
        if let Some(existing) = table.install_page(alloc, NodeId::BOOT, page, va, prot)? {
            if existing.page() != page {
                return Err(GateError::Conflict {
                    va,
                    found: existing.page().base(),
                });
            }
        }
    }

    for r in image.relocations {
        let value = image.resolve(r.target);
        // SAFETY: the image pages are kernel-owned and the offset was checked
        // to be an aligned word inside them.
        unsafe { *table.mapper().phys_to_mut::<u64>(image.image_address(r.offset)) = value };
        debug!("gate: patched +{:#x} with {value:#x}", r.offset);
    }

    let first = kernel_address(image.page.base());
    cache.flush_icache_range(first, first + PAGE_SIZE);
    if let GateLayout::Contiguous(second) = image.layout {
        let second = kernel_address(second.base());
        cache.flush_icache_range(second, second + PAGE_SIZE);
    }

    info!(
        "gate: {:?} layout at {:#x}, execute alias at {}, {} relocations",
        image.layout,
        GATE_ADDR,
        image.layout.execute_base(),
        image.relocations.len()
    );
    Ok(())
}

/// The gate window as a user-visible region.
pub static GATE_VMA: VmRegion = VmRegion {
    start: VirtualAddress::new(FIXADDR_USER_START),
    end: VirtualAddress::new(FIXADDR_USER_END),
    flags: VmFlags::READ
        .union(VmFlags::MAYREAD)
        .union(VmFlags::EXEC)
        .union(VmFlags::MAYEXEC),
    prot: PROTECTION_MAP[0b101],
    anonymous: false,
};

/// Whether `va` falls in the gate window.
#[inline]
#[must_use]
pub const fn in_gate_area(va: VirtualAddress) -> bool {
    GATE_VMA.contains(va)
}

/// The gate region of an address space; every space shares the same one.
#[inline]
#[must_use]
pub fn gate_vma<S: ?Sized>(_space: &S) -> &'static VmRegion {
    &GATE_VMA
}
