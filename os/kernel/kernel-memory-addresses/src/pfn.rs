use crate::{KernelPageSize, PageSize, PhysicalAddress};
use core::fmt;
use core::ops::{Add, Sub};

/// Page frame number: index of a kernel base page in physical memory.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageFrameNumber(u64);

impl PageFrameNumber {
    #[inline]
    #[must_use]
    pub const fn new(pfn: u64) -> Self {
        Self(pfn)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Frame containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u64() >> KernelPageSize::SHIFT)
    }

    /// Physical address of the frame's first byte.
    #[inline]
    #[must_use]
    pub const fn start_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << KernelPageSize::SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.0 < other.0 { self } else { other }
    }

    #[inline]
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if self.0 > other.0 { self } else { other }
    }
}

impl fmt::Debug for PageFrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PFN({:#x})", self.0)
    }
}

impl fmt::Display for PageFrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Add<u64> for PageFrameNumber {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub for PageFrameNumber {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Self) -> u64 {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_of_address() {
        let pfn = PhysicalAddress::new(0x4_7FFF).pfn();
        assert_eq!(pfn.as_u64(), 0x11);
        assert_eq!(pfn.start_address().as_u64(), 0x4_4000);
    }
}
