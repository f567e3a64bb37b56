//! # Page Directory Pointer Table (L3)
//!
//! An entry either points to a page directory (`PS=0`) or maps a 1 GiB
//! page (`PS=1`, base 1 GiB-aligned).

use super::{ADDR_MASK_1G, ADDR_MASK_4K, PRESENT_BIT, PS_BIT, Table, table_index};
use crate::PageFlags;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size1G, Size4K, VirtualAddress};

table_index!(
    /// Index into a PDPT (VA bits `[38:30]`).
    L3Index,
    30
);

/// A PDPT entry (PDPTE).
#[doc(alias = "PDPTE")]
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PdptEntry(u64);

/// Decoded view of a present [`PdptEntry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PdptEntryKind {
    NextPageDirectory(PhysicalPage<Size4K>, PageFlags),
    Leaf1GiB(PhysicalPage<Size1G>, PageFlags),
}

#[doc(alias = "PDPT")]
pub type PageDirectoryPointerTable = Table<PdptEntry>;

impl PdptEntry {
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

    /// `None` for a non-present entry; garbage in the other bits is ignored.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> Option<PdptEntryKind> {
        if !self.is_present() {
            return None;
        }
        let flags = PageFlags::from_entry(self.0);
        Some(if self.0 & PS_BIT != 0 {
            PdptEntryKind::Leaf1GiB(
                PhysicalPage::containing(PhysicalAddress::new(self.0 & ADDR_MASK_1G)),
                flags,
            )
        } else {
            PdptEntryKind::NextPageDirectory(
                PhysicalPage::containing(PhysicalAddress::new(self.0 & ADDR_MASK_4K)),
                flags,
            )
        })
    }

    /// Point at the page directory in `next` (`PS` forced clear).
    #[inline]
    #[must_use]
    pub const fn make_next(next: PhysicalPage<Size4K>, flags: PageFlags) -> Self {
        Self((next.as_u64() & ADDR_MASK_4K) | (flags.into_bits() & !PS_BIT) | PRESENT_BIT)
    }

    /// Map the 1 GiB page `page` (`PS` forced set).
    #[inline]
    #[must_use]
    pub const fn make_1g(page: PhysicalPage<Size1G>, flags: PageFlags) -> Self {
        Self((page.as_u64() & ADDR_MASK_1G) | flags.into_bits() | PS_BIT | PRESENT_BIT)
    }
}

impl PageDirectoryPointerTable {
    #[inline]
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> PdptEntry {
        self.get(L3Index::from(va).as_usize())
    }

    #[inline]
    pub fn set_entry(&mut self, va: VirtualAddress, e: PdptEntry) {
        self.set(L3Index::from(va).as_usize(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_and_next_are_distinguished_by_ps() {
        let pd = PhysicalPage::containing(PhysicalAddress::new(0x3000));
        let e = PdptEntry::make_next(pd, PageFlags::TABLE);
        assert_eq!(e.kind(), Some(PdptEntryKind::NextPageDirectory(pd, PageFlags::TABLE)));

        let g = PhysicalPage::containing(PhysicalAddress::new(0x4000_0000));
        let e = PdptEntry::make_1g(g, PageFlags::PRESENT | PageFlags::WRITABLE);
        match e.kind() {
            Some(PdptEntryKind::Leaf1GiB(p, f)) => {
                assert_eq!(p, g);
                assert!(f.page_size() && f.writable());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_present_garbage_is_absent() {
        assert_eq!(PdptEntry::from_raw(0xDEAD_BEEF_0000_0080).kind(), None);
    }
}
