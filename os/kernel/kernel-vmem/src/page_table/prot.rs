//! # Page Protections
//!
//! A [`PageProt`] is a PTE with the address field clear. The constants below
//! are the kernel's fixed protections and the user protection map indexed
//! by a region's read/write/exec/shared flags.

use core::fmt;

use crate::page_table::Pte;

/// Memory attribute values (`ma`).
pub mod ma {
    pub const WB: u8 = 0;
    pub const UC: u8 = 4;
    pub const UCE: u8 = 5;
    pub const WC: u8 = 6;
    /// NaT page: every load returns a NaT value, speculation never faults.
    pub const NAT: u8 = 7;
}

/// Access right values (`ar`).
pub mod ar {
    pub const R: u8 = 0;
    pub const RX: u8 = 1;
    pub const RW: u8 = 2;
    pub const RWX: u8 = 3;
    pub const R_RW: u8 = 4;
    pub const RX_RWX: u8 = 5;
    pub const RWX_RW: u8 = 6;
    /// Execute-only at the mapped privilege level, promoting `epc` entry.
    pub const X_RX: u8 = 7;
}

#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct PageProt(u64);

impl PageProt {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Same protection with a different memory attribute.
    #[inline]
    #[must_use]
    pub const fn with_memory_attribute(self, ma: u8) -> Self {
        Self(Pte::from_bits(self.0).with_ma(ma).into_bits())
    }
}

impl fmt::Debug for PageProt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = Pte::from_bits(self.0);
        write!(
            f,
            "PageProt(p={} ma={} pl={} ar={} d={})",
            u8::from(p.present()),
            p.ma(),
            p.pl(),
            p.ar(),
            u8::from(p.dirty())
        )
    }
}

/// Present, accessed, write-back, exception deferral on.
const fn access_bits() -> Pte {
    Pte::new()
        .with_present(true)
        .with_accessed(true)
        .with_ma(ma::WB)
        .with_ed(true)
}

const fn user(ar: u8) -> PageProt {
    PageProt(access_bits().with_pl(3).with_ar(ar).into_bits())
}

pub const PAGE_NONE: PageProt = PageProt(Pte::new().with_protnone(true).with_accessed(true).into_bits());
pub const PAGE_SHARED: PageProt = user(ar::RW);
pub const PAGE_READONLY: PageProt = user(ar::R);
pub const PAGE_COPY: PageProt = user(ar::R);
pub const PAGE_COPY_EXEC: PageProt = user(ar::RX);
pub const PAGE_GATE: PageProt = PageProt(access_bits().with_pl(0).with_ar(ar::X_RX).into_bits());
pub const PAGE_KERNEL: PageProt =
    PageProt(access_bits().with_dirty(true).with_pl(0).with_ar(ar::RWX).into_bits());

/// User protections indexed by `read | write << 1 | exec << 2 | shared << 3`.
pub const PROTECTION_MAP: [PageProt; 16] = [
    // private
    PAGE_NONE,
    PAGE_READONLY,
    PAGE_READONLY,
    PAGE_READONLY,
    user(ar::X_RX),
    user(ar::RX),
    PAGE_COPY_EXEC,
    PAGE_COPY_EXEC,
    // shared
    PAGE_NONE,
    PAGE_READONLY,
    PAGE_SHARED,
    PAGE_SHARED,
    user(ar::X_RX),
    user(ar::RX),
    user(ar::RWX),
    user(ar::RWX),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(p: PageProt) -> (bool, u8, u8, u8) {
        let pte = Pte::from_bits(p.bits());
        (pte.present(), pte.ma(), pte.pl(), pte.ar())
    }

    #[test]
    fn fixed_protections_are_field_values() {
        assert_eq!(fields(PAGE_KERNEL), (true, ma::WB, 0, ar::RWX));
        assert_eq!(fields(PAGE_GATE), (true, ma::WB, 0, ar::X_RX));
        assert_eq!(fields(PAGE_READONLY), (true, ma::WB, 3, ar::R));
        assert!(Pte::from_bits(PAGE_KERNEL.bits()).dirty());
        assert!(Pte::from_bits(PAGE_NONE.bits()).protnone());
        assert!(!Pte::from_bits(PAGE_NONE.bits()).present());
    }

    #[test]
    fn memory_attribute_replaces_the_whole_field() {
        let nat = PAGE_READONLY.with_memory_attribute(ma::NAT);
        assert_eq!(fields(nat), (true, ma::NAT, 3, ar::R));
        let uc = nat.with_memory_attribute(ma::UC);
        assert_eq!(fields(uc), (true, ma::UC, 3, ar::R));
        assert_eq!(uc.with_memory_attribute(ma::WB), PAGE_READONLY);
    }

    #[test]
    fn shared_writable_differs_from_private() {
        assert_eq!(fields(PROTECTION_MAP[0b0011]).3, ar::R);
        assert_eq!(fields(PROTECTION_MAP[0b1011]).3, ar::RW);
        assert_eq!(PROTECTION_MAP[0b0000], PAGE_NONE);
    }
}
