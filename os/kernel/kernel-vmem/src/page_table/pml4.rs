//! # PML4 (L4)
//!
//! The root level. Entries only ever point to a PDPT; there are no leaves.

use super::{ADDR_MASK_4K, PRESENT_BIT, PS_BIT, Table, table_index};
use crate::PageFlags;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

table_index!(
    /// Index into the PML4 (VA bits `[47:39]`).
    L4Index,
    39
);

/// A PML4 entry (PML4E).
#[doc(alias = "PML4E")]
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Pml4Entry(u64);

/// The root table, referenced by CR3.
#[doc(alias = "PML4")]
pub type PageMapLevel4 = Table<Pml4Entry>;

impl Pml4Entry {
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
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_entry(self.0)
    }

    /// The PDPT this entry points to, if present.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage<Size4K>> {
        if self.is_present() {
            Some(PhysicalPage::containing(PhysicalAddress::new(
                self.0 & ADDR_MASK_4K,
            )))
        } else {
            None
        }
    }

    /// Point at the PDPT in `next` (`PS` forced clear).
    #[inline]
    #[must_use]
    pub const fn make_next(next: PhysicalPage<Size4K>, flags: PageFlags) -> Self {
        Self((next.as_u64() & ADDR_MASK_4K) | (flags.into_bits() & !PS_BIT) | PRESENT_BIT)
    }
}

impl PageMapLevel4 {
    #[inline]
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Pml4Entry {
        self.get(L4Index::from(va).as_usize())
    }

    #[inline]
    pub fn set_entry(&mut self, va: VirtualAddress, e: Pml4Entry) {
        self.set(L4Index::from(va).as_usize(), e);
    }
}
