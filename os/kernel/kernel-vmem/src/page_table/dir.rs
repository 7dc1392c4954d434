//! # Directory Entries (PGD / PUD / PMD)
//!
//! Non-leaf entries hold the physical base of the next-level table. An
//! entry that is zero is "none": nothing below it has been populated.

use kernel_info::memory::{PAGE_SHIFT, PTRS_PER_TABLE};
use kernel_memory_addresses::{KernelPageSize, PhysicalAddress, PhysicalPage};
use bitfield_struct::bitfield;

use crate::page_table::TableIndex;

/// Link to the next-level table.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct DirEntry {
    /// Bit 0 — the link is populated.
    pub present: bool,

    /// Bits 1–13 — Ignored.
    #[bits(13)]
    __ignored: u16,

    /// Bits 14–49 — Next table physical base >> 14.
    #[bits(36)]
    table_16k: u64,

    /// Bits 50–63 — Ignored.
    #[bits(14)]
    __ignored_high: u16,
}

impl DirEntry {
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::new()
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        !self.present()
    }

    /// Entry linking to the table in `page`.
    #[inline]
    #[must_use]
    pub const fn link(page: PhysicalPage<KernelPageSize>) -> Self {
        Self::new()
            .with_present(true)
            .with_table_16k(page.base().as_u64() >> PAGE_SHIFT)
    }

    /// The linked table, if populated.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage<KernelPageSize>> {
        if self.is_none() {
            return None;
        }
        Some(PhysicalPage::from_addr(PhysicalAddress::new(
            self.table_16k() << PAGE_SHIFT,
        )))
    }
}

/// A PGD, PUD or PMD page.
#[repr(C, align(16384))]
pub struct DirectoryTable {
    entries: [DirEntry; PTRS_PER_TABLE],
}

impl DirectoryTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> DirEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: DirEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(DirEntry::none());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_round_trips_table_base() {
        let page = PhysicalPage::from_addr(PhysicalAddress::new(0x0123_4000));
        let e = DirEntry::link(page);
        assert!(!e.is_none());
        assert_eq!(e.next_table(), Some(page));
        assert!(DirEntry::none().next_table().is_none());
    }

    #[test]
    fn table_is_one_page() {
        assert_eq!(core::mem::size_of::<DirectoryTable>(), 16384);
        assert_eq!(core::mem::align_of::<DirectoryTable>(), 16384);
    }
}
