//! # Page Directory (L2)
//!
//! An entry either points to a page table (`PS=0`) or maps a 2 MiB page
//! (`PS=1`, base 2 MiB-aligned).

use super::{ADDR_MASK_2M, ADDR_MASK_4K, PRESENT_BIT, PS_BIT, Table, table_index};
use crate::PageFlags;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size2M, Size4K, VirtualAddress};

table_index!(
    /// Index into a page directory (VA bits `[29:21]`).
    L2Index,
    21
);

/// A page-directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PdEntry(u64);

/// Decoded view of a present [`PdEntry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PdEntryKind {
    NextPageTable(PhysicalPage<Size4K>, PageFlags),
    Leaf2MiB(PhysicalPage<Size2M>, PageFlags),
}

#[doc(alias = "PD")]
pub type PageDirectory = Table<PdEntry>;

impl PdEntry {
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

    #[inline]
    #[must_use]
    pub const fn kind(self) -> Option<PdEntryKind> {
        if !self.is_present() {
            return None;
        }
        let flags = PageFlags::from_entry(self.0);
        Some(if self.0 & PS_BIT != 0 {
            PdEntryKind::Leaf2MiB(
                PhysicalPage::containing(PhysicalAddress::new(self.0 & ADDR_MASK_2M)),
                flags,
            )
        } else {
            PdEntryKind::NextPageTable(
                PhysicalPage::containing(PhysicalAddress::new(self.0 & ADDR_MASK_4K)),
                flags,
            )
        })
    }

    #[inline]
    #[must_use]
    pub const fn make_next(next: PhysicalPage<Size4K>, flags: PageFlags) -> Self {
        Self((next.as_u64() & ADDR_MASK_4K) | (flags.into_bits() & !PS_BIT) | PRESENT_BIT)
    }

    #[inline]
    #[must_use]
    pub const fn make_2m(page: PhysicalPage<Size2M>, flags: PageFlags) -> Self {
        Self((page.as_u64() & ADDR_MASK_2M) | flags.into_bits() | PS_BIT | PRESENT_BIT)
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> PdEntry {
        self.get(L2Index::from(va).as_usize())
    }

    #[inline]
    pub fn set_entry(&mut self, va: VirtualAddress, e: PdEntry) {
        self.set(L2Index::from(va).as_usize(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_leaf_masks_low_bits() {
        let page = PhysicalPage::containing(PhysicalAddress::new(0x0060_0000));
        let e = PdEntry::make_2m(page, PageFlags::PRESENT | PageFlags::NO_EXECUTE);
        assert_eq!(e.raw(), 0x8000_0000_0060_0081);
        assert!(matches!(e.kind(), Some(PdEntryKind::Leaf2MiB(p, _)) if p == page));
    }
}
