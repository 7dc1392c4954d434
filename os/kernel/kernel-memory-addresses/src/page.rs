use crate::{PageFrameNumber, PageSize, PhysicalAddress, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// Page-aligned base of a physical page of size `S`.
///
/// The low `S::SHIFT` bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// Page containing `pa` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(pa: PhysicalAddress) -> Self {
        Self {
            base: pa.as_u64() & S::MASK,
            _size: PhantomData,
        }
    }

    /// Page starting at `pa`; debug-asserts alignment.
    #[inline]
    #[must_use]
    pub const fn from_addr(pa: PhysicalAddress) -> Self {
        debug_assert!(pa.as_u64() & !S::MASK == 0, "physical page base not aligned");
        Self::containing_address(pa)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < S::SIZE);
        PhysicalAddress::new(self.base | offset)
    }

    /// Frame number of the first kernel base page inside this page.
    #[inline]
    #[must_use]
    pub const fn pfn(self) -> PageFrameNumber {
        PageFrameNumber::containing(self.base())
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}K>(0x{:016X})", S::SIZE >> 10, self.base)
    }
}

/// Page-aligned base of a virtual page of size `S`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> VirtualPage<S> {
    /// Page containing `va` (aligns down).
    #[inline]
    #[must_use]
    pub const fn containing_address(va: VirtualAddress) -> Self {
        Self {
            base: va.as_u64() & S::MASK,
            _size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.base)
    }

    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> VirtualAddress {
        debug_assert!(offset < S::SIZE);
        VirtualAddress::new(self.base | offset)
    }

    /// The page immediately following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            base: self.base + S::SIZE,
            _size: PhantomData,
        }
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}K>(0x{:016X})", S::SIZE >> 10, self.base)
    }
}
