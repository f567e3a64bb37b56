//! # Virtual Memory Support
//!
//! x86-64 four-level paging for the kernel: typed page tables, an
//! [`AddressSpace`] that maps and unmaps pages of any size, and the
//! [`bootstrap`] builder that assembles the kernel's higher-half address space.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        │
//!   │        │        │        └───► PTE   → maps 4 KiB page
//!   │        │        └────────────► PDE   → PS=1 → 2 MiB page
//!   │        └─────────────────────► PDPTE → PS=1 → 1 GiB page
//!   └──────────────────────────────► PML4E
//! ```
//!
//! Table frames are reached through a [`PhysMapper`], and new tables come
//! from a [`FrameAlloc`]. Both are traits so the same walk runs over the
//! kernel's direct map and over simulated memory in tests.

#![cfg_attr(not(any(test, feature = "test-support")), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod bootstrap;
mod flags;
pub mod page_table;
mod tlb;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

pub use crate::address_space::{
    AddressSpace, LargePageSize, MapSize, MappedSize, Translation, Unmapped, VmemError,
};
pub use crate::flags::{FLAG_BITS, PageFlags};
pub use crate::page_table::TableLevel;
pub use crate::tlb::{Invlpg, TlbInvalidate};
pub use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K, VirtualAddress,
};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Source of **physical** 4 KiB frames for page tables and mapped memory.
///
/// Returned frames must be 4 KiB aligned. Contents are unspecified; the
/// page-table code zeroes what it allocates.
pub trait FrameAlloc {
    /// Allocate one frame, or `None` when exhausted.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Allocators whose own bookkeeping lives in frames they manage.
///
/// The bootstrap walks these frames to keep them reachable after the switch
/// to the new address space. The walk is a cursor so that allocations made
/// while mapping (which may consume bookkeeping frames) do not invalidate it.
pub trait BookkeepingFrames {
    /// The most recently added bookkeeping frame.
    fn first_bookkeeping_frame(&self) -> Option<PhysicalPage<Size4K>>;

    /// The frame after `frame` in the bookkeeping chain.
    ///
    /// `frame` must have been returned by this trait and must still be
    /// bookkeeping; read the successor before allocating.
    fn next_bookkeeping_frame(&self, frame: PhysicalPage<Size4K>) -> Option<PhysicalPage<Size4K>>;
}

/// Converts physical addresses to usable references in the current address
/// space (identity map, or the kernel's higher-half direct map).
pub trait PhysMapper {
    /// View the memory at `pa` as a `T`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current page tables.
    /// - The bytes at `pa` must be a valid `T`, and no other live reference
    ///   may alias them for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Fill the frame at `frame` with zeroes through `mapper`.
///
/// # Safety
/// `frame` must be owned by the caller and reachable through `mapper`.
pub unsafe fn zero_frame<M: PhysMapper>(mapper: &M, frame: PhysicalPage<Size4K>) {
    let bytes = unsafe { mapper.phys_to_mut::<[u64; 512]>(frame.base()) };
    bytes.fill(0);
}

/// Align `x` down to the nearest multiple of `a` (a power of two).
///
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (a power of two), saturating
/// at the last aligned value below `u64::MAX`.
///
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(u64::MAX, 4096), 0xFFFF_FFFF_FFFF_F000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    match x.checked_add(a - 1) {
        Some(v) => v & !(a - 1),
        None => x & !(a - 1),
    }
}
