//! # Page Entry Flags
//!
//! The attribute bits shared by every paging level, modeled with
//! [`bitfield`](bitfield_struct::bitfield). Only bits 0..=8 and bit 63 are
//! flags; the physical address bits in between are owned by the entry types
//! in [`page_table`](crate::page_table) and are always zero in a
//! [`PageFlags`] value.

use bitfield_struct::bitfield;
use core::ops::{BitOr, BitOrAssign};

/// Bits of a raw entry that [`PageFlags`] covers.
pub const FLAG_BITS: u64 = 0x8000_0000_0000_01FF;

/// Permission, caching and status bits of a page-table entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq, Hash)]
pub struct PageFlags {
    /// Bit 0: the entry is valid.
    pub present: bool,
    /// Bit 1: writes allowed.
    pub writable: bool,
    /// Bit 2: ring 3 may access.
    pub user: bool,
    /// Bit 3: PWT.
    pub write_through: bool,
    /// Bit 4: PCD.
    pub cache_disable: bool,
    /// Bit 5: set by the CPU on access.
    pub accessed: bool,
    /// Bit 6: set by the CPU on write (leaves only).
    pub dirty: bool,
    /// Bit 7: PS. Marks a 2 MiB/1 GiB leaf in a PD/PDPT entry.
    pub page_size: bool,
    /// Bit 8: survives CR3 reloads when `CR4.PGE` is set.
    pub global: bool,

    #[bits(54)]
    _address_and_available: u64,

    /// Bit 63: instruction fetches fault (requires `EFER.NXE`).
    pub no_execute: bool,
}

impl PageFlags {
    pub const PRESENT: Self = Self::new().with_present(true);
    pub const WRITABLE: Self = Self::new().with_writable(true);
    pub const USER: Self = Self::new().with_user(true);
    pub const WRITE_THROUGH: Self = Self::new().with_write_through(true);
    pub const CACHE_DISABLE: Self = Self::new().with_cache_disable(true);
    pub const GLOBAL: Self = Self::new().with_global(true);
    pub const NO_EXECUTE: Self = Self::new().with_no_execute(true);

    /// Flags given to newly created intermediate tables.
    ///
    /// Intermediate levels are permissive; the leaf decides the effective
    /// permissions.
    pub const TABLE: Self = Self::new()
        .with_present(true)
        .with_writable(true)
        .with_user(true);

    /// Extract the flag bits of a raw entry.
    #[inline]
    #[must_use]
    pub const fn from_entry(raw: u64) -> Self {
        Self::from_bits(raw & FLAG_BITS)
    }

    /// `true` if every bit set in `other` is also set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.into_bits() & other.into_bits() == other.into_bits()
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.into_bits() | rhs.into_bits())
    }
}

impl BitOrAssign for PageFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions() {
        assert_eq!(PageFlags::PRESENT.into_bits(), 1 << 0);
        assert_eq!(PageFlags::WRITABLE.into_bits(), 1 << 1);
        assert_eq!(PageFlags::USER.into_bits(), 1 << 2);
        assert_eq!(PageFlags::CACHE_DISABLE.into_bits(), 1 << 4);
        assert_eq!(PageFlags::new().with_page_size(true).into_bits(), 1 << 7);
        assert_eq!(PageFlags::GLOBAL.into_bits(), 1 << 8);
        assert_eq!(PageFlags::NO_EXECUTE.into_bits(), 1 << 63);
    }

    #[test]
    fn from_entry_drops_address_bits() {
        let raw = 0x8000_0000_0012_3000 | 0b11;
        let flags = PageFlags::from_entry(raw);
        assert_eq!(flags, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_EXECUTE);
    }

    #[test]
    fn contains_checks_subset() {
        let f = PageFlags::PRESENT | PageFlags::WRITABLE;
        assert!(f.contains(PageFlags::PRESENT));
        assert!(!f.contains(PageFlags::PRESENT | PageFlags::USER));
    }
}
