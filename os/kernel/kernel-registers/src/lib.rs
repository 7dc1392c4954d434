//! # Typed IA-64 Translation Registers
//!
//! Bit-level models of the control registers the memory bootstrap programs:
//! the page table address register ([`Pta`]) and the eight region registers
//! ([`RegionRegister`]). The actual `mov` instructions are platform code;
//! this crate exposes them through the [`ControlRegisters`] interface so the
//! layout logic can be exercised without the hardware.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod pta;
pub mod rr;

pub use pta::Pta;
pub use rr::RegionRegister;

/// Write access to the translation control registers of the current CPU.
///
/// Implementations must serialize the data stream after each write so the
/// new value is visible to the next translation.
pub trait ControlRegisters {
    /// Write `cr.pta`.
    fn store_pta(&mut self, pta: Pta);

    /// Read region register `rr[region]`.
    fn load_region_register(&self, region: u64) -> RegionRegister;

    /// Write region register `rr[region]`.
    fn store_region_register(&mut self, region: u64, rr: RegionRegister);
}

impl<T: ControlRegisters + ?Sized> ControlRegisters for &mut T {
    #[inline]
    fn store_pta(&mut self, pta: Pta) {
        (**self).store_pta(pta);
    }

    #[inline]
    fn load_region_register(&self, region: u64) -> RegionRegister {
        (**self).load_region_register(region)
    }

    #[inline]
    fn store_region_register(&mut self, region: u64, rr: RegionRegister) {
        (**self).store_region_register(region, rr);
    }
}
