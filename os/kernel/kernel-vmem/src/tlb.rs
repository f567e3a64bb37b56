//! # TLB Maintenance
//!
//! Page-table writes go through [`TlbInvalidate`] so the walk can run
//! against simulated memory in tests while the kernel issues `invlpg`.

use kernel_memory_addresses::VirtualAddress;

/// Drops cached translations after a page-table entry changes.
pub trait TlbInvalidate {
    /// Invalidate the translation covering `va`. For a large page any
    /// address inside the page works.
    fn invalidate_page(&self, va: VirtualAddress);
}

/// Invalidates with `invlpg` on the executing CPU.
#[derive(Debug, Default, Copy, Clone)]
pub struct Invlpg;

impl TlbInvalidate for Invlpg {
    #[inline]
    fn invalidate_page(&self, va: VirtualAddress) {
        // SAFETY: invlpg has no memory effects beyond the TLB and is valid
        // for any address.
        unsafe {
            core::arch::asm!(
                "invlpg [{}]",
                in(reg) va.as_u64(),
                options(nostack, preserves_flags)
            );
        }
    }
}
