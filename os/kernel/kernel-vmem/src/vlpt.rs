//! # Virtual Linear Page Table Placement
//!
//! On a TLB miss the hardware walker computes the address of the faulting
//! page's PTE inside a linear table of `2^vmlpt_bits` bytes. That table has
//! to cover the whole space the page-table tree can map within one region,
//! and it has to fit below the implemented address width.
//!
//! ```text
//! mapped_space_bits = 3 × (PAGE_SHIFT − PTE_BITS) + PAGE_SHIFT
//! vmlpt_bits        = impl_va_bits − PAGE_SHIFT + PTE_BITS
//! base              = 2^61 − 2^vmlpt_bits
//! ```
//!
//! The table is placed at the top of the region offset range, so it never
//! overlaps anything the kernel maps below it.

use kernel_info::memory::{PAGE_SHIFT, PTE_BITS, RGN_BITS};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::{ControlRegisters, Pta};
use log::info;

/// Smallest and largest implemented virtual-address widths.
pub const IMPL_VA_BITS_MIN: u32 = 51;
pub const IMPL_VA_BITS_MAX: u32 = 61;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VlptError {
    #[error("CPU has bogus IMPL_VA_MSB value of {}", .impl_va_bits.wrapping_sub(1))]
    BogusAddressWidth { impl_va_bits: u32 },
    #[error(
        "cannot build a big enough virtual-linear page table to cover {mapped_space_bits} mapped bits \
         with a 2^{vmlpt_bits} byte table and {impl_va_bits} implemented bits; try a smaller page size"
    )]
    TableTooSmall {
        mapped_space_bits: u32,
        vmlpt_bits: u32,
        impl_va_bits: u32,
    },
}

/// Implemented VA width from the processor's unimplemented-address mask.
///
/// The region bits are always implemented and are forced into the mask.
#[inline]
#[must_use]
pub const fn implemented_va_bits(unimpl_va_mask: u64) -> u32 {
    (unimpl_va_mask | (7 << RGN_BITS)).trailing_zeros()
}

/// Placement of the virtual linear page table; immutable once computed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VlptConfig {
    impl_va_bits: u32,
    vmlpt_bits: u32,
    base: VirtualAddress,
}

impl VlptConfig {
    /// Layout for the kernel page size.
    ///
    /// # Errors
    /// See [`compute_for_page_shift`](Self::compute_for_page_shift).
    pub const fn compute(impl_va_bits: u32) -> Result<Self, VlptError> {
        Self::compute_for_page_shift(impl_va_bits, PAGE_SHIFT)
    }

    /// Layout for an arbitrary page size.
    ///
    /// # Errors
    /// - [`VlptError::BogusAddressWidth`] outside `[51, 61]`.
    /// - [`VlptError::TableTooSmall`] if the table cannot hold a PTE for every
    ///   mappable page or the mapped space reaches past the implemented width.
    pub const fn compute_for_page_shift(
        impl_va_bits: u32,
        page_shift: u32,
    ) -> Result<Self, VlptError> {
        if impl_va_bits < IMPL_VA_BITS_MIN || impl_va_bits > IMPL_VA_BITS_MAX {
            return Err(VlptError::BogusAddressWidth { impl_va_bits });
        }

        let mapped_space_bits = mapped_space_bits(page_shift);
        let vmlpt_bits = impl_va_bits - page_shift + PTE_BITS;

        if mapped_space_bits - page_shift > vmlpt_bits - PTE_BITS
            || mapped_space_bits > impl_va_bits - 1
        {
            return Err(VlptError::TableTooSmall {
                mapped_space_bits,
                vmlpt_bits,
                impl_va_bits,
            });
        }

        Ok(Self {
            impl_va_bits,
            vmlpt_bits,
            base: VirtualAddress::new((1 << RGN_BITS) - (1 << vmlpt_bits)),
        })
    }

    #[inline]
    #[must_use]
    pub const fn impl_va_bits(&self) -> u32 {
        self.impl_va_bits
    }

    #[inline]
    #[must_use]
    pub const fn vmlpt_bits(&self) -> u32 {
        self.vmlpt_bits
    }

    /// Region offset of the table.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Table size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        1 << self.vmlpt_bits
    }

    /// Whether the region offsets of `[start, end)` intersect the table.
    #[must_use]
    pub const fn overlaps(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        let lo = start.region_offset();
        let hi = if end.region() > start.region() {
            1 << RGN_BITS
        } else {
            end.region_offset()
        };
        lo < self.base.as_u64() + self.size() && hi > self.base.as_u64()
    }

    /// PTA value: short format, size, base, walker enabled with `vhpt`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn pta(&self) -> Pta {
        Pta::short_format(self.base, self.vmlpt_bits as u8, cfg!(feature = "vhpt"))
    }

    /// Program the PTA and, with `hugetlb`, the huge-page region register.
    pub fn activate<R: ControlRegisters + ?Sized>(&self, regs: &mut R) {
        regs.store_pta(self.pta());
        info!(
            "VLPT: {} implemented VA bits, 2^{} byte table at region offset {}",
            self.impl_va_bits, self.vmlpt_bits, self.base
        );

        #[cfg(feature = "hugetlb")]
        {
            use kernel_info::memory::{HPAGE_SHIFT, RGN_HPAGE};
            #[allow(clippy::cast_possible_truncation)]
            let rr = kernel_registers::RegionRegister::new().with_ps(HPAGE_SHIFT as u8);
            regs.store_region_register(RGN_HPAGE, rr);
        }
    }
}

/// Bits of region offset the page-table tree can map.
#[inline]
#[must_use]
pub const fn mapped_space_bits(page_shift: u32) -> u32 {
    3 * (page_shift - PTE_BITS) + page_shift
}
