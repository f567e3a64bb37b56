//! # HHDM-based `PhysMapper`
//!
//! With the higher-half direct map in place every physical address `pa` is
//! visible at `HHDM_BASE + pa`, so converting is a single addition.

use kernel_info::memory::HHDM_BASE;
use kernel_vmem::{PhysMapper, PhysicalAddress, VirtualAddress};

/// [`PhysMapper`] for code running on the kernel's page tables.
///
/// # Safety
/// Only valid once the direct map covers the referenced physical range.
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// The direct-map alias of `pa`.
    #[inline]
    #[must_use]
    pub const fn virt(pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(HHDM_BASE + pa.as_u64())
    }
}

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = Self::virt(pa).as_mut_ptr::<T>();
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }
}
