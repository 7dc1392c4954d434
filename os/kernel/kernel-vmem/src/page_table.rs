//! # Kernel Page Table Levels
//!
//! The kernel's translation tree has four levels. Every level is one 16 KiB
//! page holding 2048 eight-byte entries, so each level consumes 11 bits of
//! the region offset:
//!
//! ```text
//! | 60‒58 | 57‒47 | 46‒36 | 35‒25 | 24‒14 | 13‒0   |
//! |  --   |  PGD  |  PUD  |  PMD  |  PTE  | offset |
//! ```
//!
//! The kernel directory is indexed without the region bits; it only ever
//! serves region 5.

pub mod dir;
pub mod prot;
pub mod pte;

use core::fmt;
use kernel_info::memory::{PAGE_SHIFT, PGDIR_SHIFT, PMD_SHIFT, PTRS_PER_TABLE, PUD_SHIFT};
use kernel_memory_addresses::VirtualAddress;

pub use dir::{DirEntry, DirectoryTable};
pub use prot::PageProt;
pub use pte::{LeafTable, Pte};

/// One level of the translation tree, top to bottom.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Pgd,
    Pud,
    Pmd,
    Pte,
}

impl Level {
    /// Lowest address bit indexed at this level.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pgd => PGDIR_SHIFT,
            Self::Pud => PUD_SHIFT,
            Self::Pmd => PMD_SHIFT,
            Self::Pte => PAGE_SHIFT,
        }
    }

    /// Bytes of address space covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn span(self) -> u64 {
        1 << self.shift()
    }

    /// Entry index for `va` at this level.
    #[inline]
    #[must_use]
    pub const fn index(self, va: VirtualAddress) -> TableIndex {
        TableIndex::new(((va.as_u64() >> self.shift()) as usize) & (PTRS_PER_TABLE - 1))
    }

    /// The level below, `None` at the leaf.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pgd => Some(Self::Pud),
            Self::Pud => Some(Self::Pmd),
            Self::Pmd => Some(Self::Pte),
            Self::Pte => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pgd => "pgd",
            Self::Pud => "pud",
            Self::Pmd => "pmd",
            Self::Pte => "pte",
        })
    }
}

/// Index into any table level; always `< PTRS_PER_TABLE`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(v: usize) -> Self {
        debug_assert!(v < PTRS_PER_TABLE);
        Self(v as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Indices for all four levels of `va`.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> [TableIndex; 4] {
    [
        Level::Pgd.index(va),
        Level::Pud.index(va),
        Level::Pmd.index(va),
        Level::Pte.index(va),
    ]
}
