//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and page bases used by the
//! frame allocator and the page-table code.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A physical (RAM or MMIO) byte address. |
//! | [`VirtualAddress`] | A page-table translated byte address. |
//! | [`PhysicalPage<S>`] | The aligned base of a physical page of size `S`; a *frame* for [`Size4K`]. |
//!
//! The page size is carried at the type level by the [`PageSize`] markers
//! [`Size4K`], [`Size2M`] and [`Size1G`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
//! assert_eq!(va.align_down::<Size4K>().as_u64(), 0xFFFF_FFFF_8000_1000);
//! assert_eq!(va.offset::<Size4K>(), 0x234);
//!
//! let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
//! let frame = pa.page::<Size4K>();
//! assert_eq!(frame.join(pa.offset::<Size4K>()), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;

pub use page_size::{PageSize, Size1G, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        let a = PhysicalAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u64(), 0x12000);
        assert_eq!(a.page::<Size4K>().base().as_u64(), 0x12000);
        assert_eq!(a.offset::<Size4K>(), 0x345);
        assert!(!a.is_aligned::<Size4K>());
        assert!(PhysicalAddress::new(0x20_0000).is_aligned::<Size2M>());
    }

    #[test]
    fn virtual_align_up_saturates() {
        let va = VirtualAddress::new(0x1001);
        assert_eq!(va.align_up::<Size4K>().as_u64(), 0x2000);
        let top = VirtualAddress::new(u64::MAX);
        assert_eq!(top.align_up::<Size4K>().as_u64(), 0xFFFF_FFFF_FFFF_F000);
    }

    #[test]
    fn frame_from_aligned() {
        assert!(PhysicalPage::<Size4K>::from_aligned(PhysicalAddress::new(0x1000)).is_some());
        assert!(PhysicalPage::<Size4K>::from_aligned(PhysicalAddress::new(0x1800)).is_none());
        assert!(PhysicalPage::<Size1G>::from_aligned(PhysicalAddress::new(0x20_0000)).is_none());
    }

    #[test]
    fn virtual_difference() {
        let a = VirtualAddress::new(0xFFFF_FFFF_8010_0000);
        let b = VirtualAddress::new(0xFFFF_FFFF_8000_0000);
        assert_eq!(a - b, 0x10_0000);
    }
}
