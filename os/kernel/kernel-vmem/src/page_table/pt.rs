//! # Page Table (L1)
//!
//! Every present entry maps a 4 KiB page. Bit 7 is PAT at this level and is
//! always written clear.

use super::{ADDR_MASK_4K, PRESENT_BIT, PS_BIT, Table, table_index};
use crate::PageFlags;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

table_index!(
    /// Index into a page table (VA bits `[20:12]`).
    L1Index,
    12
);

/// A page-table entry (PTE).
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PtEntry(u64);

#[doc(alias = "PT")]
pub type PageTable = Table<PtEntry>;

impl PtEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0 & PRESENT_BIT != 0
    }

    /// The mapped frame and its flags, if present.
    #[inline]
    #[must_use]
    pub const fn page_4k(self) -> Option<(PhysicalPage<Size4K>, PageFlags)> {
        if !self.is_present() {
            return None;
        }
        Some((
            PhysicalPage::containing(PhysicalAddress::new(self.0 & ADDR_MASK_4K)),
            PageFlags::from_entry(self.0),
        ))
    }

    /// `page | flags`, with `PS` forced clear. `present` is taken from `flags`.
    #[inline]
    #[must_use]
    pub const fn make_4k(page: PhysicalPage<Size4K>, flags: PageFlags) -> Self {
        Self((page.as_u64() & ADDR_MASK_4K) | (flags.into_bits() & !PS_BIT))
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> PtEntry {
        self.get(L1Index::from(va).as_usize())
    }

    #[inline]
    pub fn set_entry(&mut self, va: VirtualAddress, e: PtEntry) {
        self.set(L1Index::from(va).as_usize(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_is_address_or_flags() {
        let page = PhysicalPage::containing(PhysicalAddress::new(0x0012_3000));
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_EXECUTE;
        let e = PtEntry::make_4k(page, flags.with_page_size(true));
        assert_eq!(e.raw(), 0x0012_3000 | flags.into_bits());
        assert_eq!(e.page_4k(), Some((page, flags)));
    }
}
