use core::fmt;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the page sizes the IA-64 bootstrap code deals with.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// `log2(SIZE)`.
    const SHIFT: u32;
    /// Mask that clears the in-page offset.
    const MASK: u64 = !(Self::SIZE - 1);
}

macro_rules! page_size {
    ($(#[$doc:meta])* $name:ident, $shift:expr, $label:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str($label)
            }
        }
    };
}

page_size!(
    /// 16 KiB kernel base page.
    Size16K,
    14,
    "16K"
);
page_size!(
    /// 256 KiB per-CPU page.
    Size256K,
    18,
    "256K"
);
page_size!(
    /// 16 MiB identity-mapping granule.
    Size16M,
    24,
    "16M"
);
page_size!(
    /// 256 MiB huge page.
    Size256M,
    28,
    "256M"
);

/// The page size the kernel's page tables are built with.
pub type KernelPageSize = Size16K;
