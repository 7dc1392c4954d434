//! # Leaf Entries (short-format PTE)
//!
//! | Bits  | Field | Meaning |
//! |-------|-------|---------|
//! | 0     | `p`   | present |
//! | 2–4   | `ma`  | memory attribute (WB, UC, NaT page, …) |
//! | 5     | `a`   | accessed |
//! | 6     | `d`   | dirty |
//! | 7–8   | `pl`  | privilege level |
//! | 9–11  | `ar`  | access rights |
//! | 12–49 | `ppn` | physical page number (4 KiB units) |
//! | 52    | `ed`  | exception deferral |
//! | 63    | —     | software "protnone" |

use bitfield_struct::bitfield;
use kernel_info::memory::{PAGE_MASK, PTRS_PER_TABLE};
use kernel_memory_addresses::{KernelPageSize, PageFrameNumber, PhysicalAddress, PhysicalPage};

use crate::page_table::{PageProt, TableIndex};

#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Pte {
    pub present: bool,

    #[bits(1)]
    __rv0: u8,

    /// Memory attribute.
    #[bits(3)]
    pub ma: u8,

    pub accessed: bool,

    pub dirty: bool,

    /// Privilege level (0 = kernel, 3 = user).
    #[bits(2)]
    pub pl: u8,

    /// Access rights.
    #[bits(3)]
    pub ar: u8,

    /// Physical address bits 12..49.
    #[bits(38)]
    ppn_4k: u64,

    #[bits(2)]
    __rv1: u8,

    pub ed: bool,

    #[bits(10)]
    __ignored: u16,

    pub protnone: bool,
}

impl Pte {
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::new()
    }

    /// All bits clear; never installed.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.into_bits() == 0
    }

    /// Leaf mapping `page` with protection `prot`.
    #[inline]
    #[must_use]
    pub const fn make(page: PhysicalPage<KernelPageSize>, prot: PageProt) -> Self {
        Self::from_bits(prot.bits() | (page.base().as_u64() & PAGE_MASK & Self::PPN_MASK))
    }

    const PPN_MASK: u64 = ((1 << 50) - 1) & !0xfff;

    /// The mapped page.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<KernelPageSize> {
        PhysicalPage::containing_address(PhysicalAddress::new(self.ppn_4k() << 12))
    }

    #[inline]
    #[must_use]
    pub const fn pfn(self) -> PageFrameNumber {
        self.page().pfn()
    }

    /// Protection bits without the address.
    #[inline]
    #[must_use]
    pub const fn prot(self) -> PageProt {
        PageProt::from_bits(self.into_bits() & !Self::PPN_MASK)
    }
}

/// A leaf page: 2048 PTEs.
#[repr(C, align(16384))]
pub struct LeafTable {
    entries: [Pte; PTRS_PER_TABLE],
}

impl LeafTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> Pte {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: Pte) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(Pte::none());
    }

    /// Slot `i` for in-place update.
    #[inline]
    pub const fn entry_mut(&mut self, i: TableIndex) -> &mut Pte {
        &mut self.entries[i.as_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::prot::{PAGE_GATE, PAGE_KERNEL};

    #[test]
    fn make_keeps_prot_and_address_apart() {
        let page = PhysicalPage::from_addr(PhysicalAddress::new(0x3_FFFF_C000));
        let pte = Pte::make(page, PAGE_KERNEL);
        assert!(pte.present());
        assert!(pte.dirty());
        assert_eq!(pte.page(), page);
        assert_eq!(pte.prot(), PAGE_KERNEL);
        assert_eq!(pte.pfn().as_u64(), 0x3_FFFF_C000 >> 14);
    }

    #[test]
    fn gate_pages_are_privilege_promoting() {
        let pte = Pte::make(PhysicalPage::from_addr(PhysicalAddress::new(0x4000)), PAGE_GATE);
        assert_eq!(pte.pl(), 0);
        assert_eq!(pte.ar(), 7);
    }
}
