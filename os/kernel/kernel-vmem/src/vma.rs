//! # Virtual Memory Regions
//!
//! The pieces of a process address space this crate constructs and hands
//! off: region descriptors, their flags, and the [`RegionSet`] seam into
//! whatever manages a process's regions.

use alloc::vec::Vec;
use core::fmt;

use kernel_memory_addresses::VirtualAddress;

use crate::page_table::prot::PROTECTION_MAP;
use crate::PageProt;

bitflags::bitflags! {
    /// Region flags.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct VmFlags: u64 {
        const READ       = 0x0000_0001;
        const WRITE      = 0x0000_0002;
        const EXEC       = 0x0000_0004;
        const SHARED     = 0x0000_0008;
        const MAYREAD    = 0x0000_0010;
        const MAYWRITE   = 0x0000_0020;
        const MAYEXEC    = 0x0000_0040;
        const MAYSHARE   = 0x0000_0080;
        const GROWSDOWN  = 0x0000_0100;
        const GROWSUP    = 0x0000_0200;
        /// Memory-mapped I/O or similar; never core dumped or merged.
        const IO         = 0x0000_4000;
        const DONTEXPAND = 0x0004_0000;
        /// Charged against the commit limit.
        const ACCOUNT    = 0x0010_0000;
        const DONTDUMP   = 0x0400_0000;
    }
}

bitflags::bitflags! {
    /// Process personality bits consulted during address-space setup.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Personality: u32 {
        /// Keep page zero free for the program to map.
        const MMAP_PAGE_ZERO    = 0x010_0000;
        const READ_IMPLIES_EXEC = 0x040_0000;
    }
}

impl VmFlags {
    /// Default flags for data regions of a process with `personality`.
    #[must_use]
    pub const fn data_default(personality: Personality) -> Self {
        let base = Self::READ
            .union(Self::WRITE)
            .union(Self::MAYREAD)
            .union(Self::MAYWRITE)
            .union(Self::MAYEXEC);
        if personality.contains(Personality::READ_IMPLIES_EXEC) {
            base.union(Self::EXEC)
        } else {
            base
        }
    }
}

/// Hardware protection for a region with `flags`.
#[must_use]
pub const fn vm_get_page_prot(flags: VmFlags) -> PageProt {
    let mut idx = 0;
    if flags.contains(VmFlags::READ) {
        idx |= 1;
    }
    if flags.contains(VmFlags::WRITE) {
        idx |= 2;
    }
    if flags.contains(VmFlags::EXEC) {
        idx |= 4;
    }
    if flags.contains(VmFlags::SHARED) {
        idx |= 8;
    }
    PROTECTION_MAP[idx]
}

/// A fully formed region `[start, end)`.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct VmRegion {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
    pub flags: VmFlags,
    pub prot: PageProt,
    /// No backing file.
    pub anonymous: bool,
}

impl VmRegion {
    /// Anonymous region with the protection derived from `flags`.
    #[must_use]
    pub const fn anonymous(start: VirtualAddress, end: VirtualAddress, flags: VmFlags) -> Self {
        Self {
            start,
            end,
            flags,
            prot: vm_get_page_prot(flags),
            anonymous: true,
        }
    }

    /// Same region with an explicit protection.
    #[must_use]
    pub const fn with_prot(mut self, prot: PageProt) -> Self {
        self.prot = prot;
        self
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.as_u64() <= self.start.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.start.as_u64() && va.as_u64() < self.end.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start.as_u64() < other.end.as_u64() && other.start.as_u64() < self.end.as_u64()
    }
}

impl fmt::Debug for VmRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VmRegion[{}..{}) {:?} {:?}",
            self.start, self.end, self.flags, self.prot
        )
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RegionInsertError {
    #[error("region [{start}, {end}) overlaps an existing region")]
    Overlap {
        start: VirtualAddress,
        end: VirtualAddress,
    },
    #[error("no memory for region descriptor")]
    OutOfMemory,
}

/// The set of regions of one address space.
pub trait RegionSet {
    /// Add `region`; rejects overlap with an existing region.
    ///
    /// # Errors
    /// [`RegionInsertError`] if the region cannot be added; the set is unchanged.
    fn insert_region(&mut self, region: VmRegion) -> Result<(), RegionInsertError>;

    /// The region containing `va`, if any.
    fn find_region(&self, va: VirtualAddress) -> Option<&VmRegion>;
}

/// Regions kept sorted by start address.
impl RegionSet for Vec<VmRegion> {
    fn insert_region(&mut self, region: VmRegion) -> Result<(), RegionInsertError> {
        let at = self.partition_point(|r| r.start.as_u64() < region.start.as_u64());
        let clash = |r: &VmRegion| r.overlaps(&region);
        let prev = at.checked_sub(1).and_then(|i| self.get(i));
        if self.get(at).is_some_and(clash) || prev.is_some_and(clash) {
            return Err(RegionInsertError::Overlap {
                start: region.start,
                end: region.end,
            });
        }
        self.try_reserve(1).map_err(|_| RegionInsertError::OutOfMemory)?;
        self.insert(at, region);
        Ok(())
    }

    fn find_region(&self, va: VirtualAddress) -> Option<&VmRegion> {
        let at = self.partition_point(|r| r.start.as_u64() <= va.as_u64());
        at.checked_sub(1)
            .and_then(|i| self.get(i))
            .filter(|r| r.contains(va))
    }
}
