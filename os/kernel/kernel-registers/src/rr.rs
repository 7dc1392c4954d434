use bitfield_struct::bitfield;

/// Region register `rr[0..8]`.
#[bitfield(u64)]
pub struct RegionRegister {
    /// Bit 0 — VE: VHPT walker enabled for this region.
    pub ve: bool,

    /// Bit 1 — Reserved.
    #[bits(1)]
    __reserved0: u8,

    /// Bits 2–7 — Preferred page size (`log2`).
    #[bits(6)]
    pub ps: u8,

    /// Bits 8–31 — Region identifier.
    #[bits(24)]
    pub rid: u32,

    /// Bits 32–63 — Reserved.
    #[bits(32)]
    __reserved1: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_field_is_bits_2_to_7() {
        let rr = RegionRegister::new().with_ps(28).with_rid(0x1234);
        assert_eq!(rr.into_bits(), (0x1234 << 8) | (28 << 2));
    }
}
