use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// PTA — Page Table Address register.
///
/// Locates the virtual linear page table that the VHPT walker consults on a
/// TLB miss.
#[bitfield(u64)]
pub struct Pta {
    /// Bit 0 — VE: enable the VHPT walker.
    pub ve: bool,

    /// Bit 1 — Reserved.
    #[bits(1)]
    __reserved0: u8,

    /// Bits 2–7 — `log2` of the table size in bytes.
    #[bits(6)]
    pub size: u8,

    /// Bit 8 — VF: long format when set, short (linear) format when clear.
    pub vf: bool,

    /// Bits 9–14 — Reserved.
    #[bits(6)]
    __reserved1: u8,

    /// Bits 15–63 — Table base >> 15.
    #[bits(49)]
    base_bits: u64,
}

impl Pta {
    /// Short-format table of `2^size` bytes at `base`.
    ///
    /// `base` must be aligned to the table size.
    #[must_use]
    pub const fn short_format(base: VirtualAddress, size: u8, enable: bool) -> Self {
        debug_assert!(base.as_u64() & ((1u64 << size) - 1) == 0);
        Self::new()
            .with_ve(enable)
            .with_size(size)
            .with_vf(false)
            .with_base_bits(base.as_u64() >> 15)
    }

    /// Table base address.
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        VirtualAddress::new(self.base_bits() << 15)
    }
}
