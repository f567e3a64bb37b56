use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the page granularities the x86-64 MMU can map.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
    /// Short human-readable name, used in diagnostics.
    const NAME: &'static str;

    /// Mask selecting the in-page offset bits.
    #[inline]
    #[must_use]
    fn offset_mask() -> u64 {
        Self::SIZE - 1
    }
}

macro_rules! page_size {
    ($(#[$meta:meta])* $name:ident, $shift:expr, $label:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;
            const NAME: &'static str = $label;
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::NAME)
            }
        }
    };
}

page_size!(
    /// 4 KiB page (4096 bytes); the frame granularity.
    Size4K, 12, "4K"
);
page_size!(
    /// 2 MiB large page, mapped by a PS-marked page-directory entry.
    Size2M, 21, "2M"
);
page_size!(
    /// 1 GiB large page, mapped by a PS-marked PDPT entry.
    Size1G, 30, "1G"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_shifts() {
        assert_eq!(Size4K::SIZE, 4096);
        assert_eq!(Size2M::SIZE, 2 * 1024 * 1024);
        assert_eq!(Size1G::SIZE, 1024 * 1024 * 1024);
        assert_eq!(Size2M::offset_mask(), 0x1F_FFFF);
        assert_eq!(format!("{Size1G:?}"), "1G");
    }
}
