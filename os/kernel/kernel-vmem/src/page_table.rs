//! # Page Tables
//!
//! One 4 KiB table type generic over its entry, plus typed per-level entries
//! and indices:
//!
//! | Level | Index | Entry | Leaf size |
//! |-------|-------|-------|-----------|
//! | PML4 | [`L4Index`] | [`Pml4Entry`] | none |
//! | PDPT | [`L3Index`] | [`PdptEntry`] | 1 GiB (`PS=1`) |
//! | PD   | [`L2Index`] | [`PdEntry`]   | 2 MiB (`PS=1`) |
//! | PT   | [`L1Index`] | [`PtEntry`]   | 4 KiB |

pub mod pd;
pub mod pdpt;
pub mod pml4;
pub mod pt;

use core::fmt;
use kernel_memory_addresses::VirtualAddress;

pub use pd::{L2Index, PageDirectory, PdEntry, PdEntryKind};
pub use pdpt::{L3Index, PageDirectoryPointerTable, PdptEntry, PdptEntryKind};
pub use pml4::{L4Index, PageMapLevel4, Pml4Entry};
pub use pt::{L1Index, PageTable, PtEntry};

/// Number of entries per table at every level.
pub const ENTRIES: usize = 512;

/// Physical address bits of a 4 KiB-aligned base (bits 12..=51).
pub const ADDR_MASK_4K: u64 = 0x000F_FFFF_FFFF_F000;

/// Physical address bits of a 2 MiB-aligned base (bits 21..=51).
pub const ADDR_MASK_2M: u64 = 0x000F_FFFF_FFE0_0000;

/// Physical address bits of a 1 GiB-aligned base (bits 30..=51).
pub const ADDR_MASK_1G: u64 = 0x000F_FFFF_C000_0000;

const PRESENT_BIT: u64 = 1 << 0;

/// PS bit. In a 4 KiB PTE the same position is PAT and is kept clear.
const PS_BIT: u64 = 1 << 7;

/// A paging level, used in diagnostics.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TableLevel {
    Pml4,
    Pdpt,
    Pd,
    Pt,
}

impl fmt::Display for TableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pml4 => "PML4",
            Self::Pdpt => "PDPT",
            Self::Pd => "PD",
            Self::Pt => "PT",
        })
    }
}

/// A 4 KiB-aligned table of 512 entries.
#[repr(C, align(4096))]
pub struct Table<E> {
    entries: [E; ENTRIES],
}

impl<E: Copy> Table<E> {
    #[inline]
    #[must_use]
    pub fn get(&self, i: usize) -> E {
        self.entries[i]
    }

    #[inline]
    pub fn set(&mut self, i: usize, e: E) {
        self.entries[i] = e;
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = E> + '_ {
        self.entries.iter().copied()
    }
}

macro_rules! table_index {
    ($(#[$meta:meta])* $name:ident, $shift:expr) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u16);

        impl $name {
            /// Extract the index bits from a virtual address.
            #[inline]
            #[must_use]
            #[allow(clippy::cast_possible_truncation)]
            pub const fn from(va: VirtualAddress) -> Self {
                Self(((va.as_u64() >> $shift) & 0x1FF) as u16)
            }

            #[inline]
            #[must_use]
            pub const fn new(v: u16) -> Self {
                debug_assert!(v < 512);
                Self(v)
            }

            #[inline]
            #[must_use]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }
        }
    };
}

pub(crate) use table_index;

/// Split `va` into its four table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (L4Index, L3Index, L2Index, L1Index) {
    (
        L4Index::from(va),
        L3Index::from(va),
        L2Index::from(va),
        L1Index::from(va),
    )
}
