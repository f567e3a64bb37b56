//! # Model-Specific Registers (MSR)
//!
//! Raw `RDMSR`/`WRMSR` access plus the typed [`Ia32ApicBase`] register that
//! decides whether the Local APIC is driven through MSRs (x2APIC) or MMIO
//! (xAPIC).

use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// Identifies a **Model-Specific Register (MSR)** by its architectural index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msr(pub u32);

impl Msr {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Write a 64-bit value to this MSR.
    ///
    /// # Safety
    /// - `WRMSR` is privileged and raises #GP(0) outside CPL 0.
    /// - The MSR must exist and be writable on this CPU.
    #[cfg(feature = "asm")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn store_raw(self, val: u64) {
        let lo = (val & 0xFFFF_FFFF) as u32;
        let hi = (val >> 32) as u32;
        unsafe {
            core::arch::asm!(
            "wrmsr",
            in("ecx") self.0,
            in("eax") lo,
            in("edx") hi,
            options(nostack, preserves_flags)
            );
        }
    }

    /// Read the 64-bit value of this MSR.
    ///
    /// # Safety
    /// - `RDMSR` is privileged and raises #GP(0) outside CPL 0.
    /// - The MSR must exist on this CPU.
    #[cfg(feature = "asm")]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub unsafe fn load_raw(self) -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            core::arch::asm!(
            "rdmsr",
            in("ecx") self.0,
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}

/// `IA32_APIC_BASE` (MSR `0x1B`).
#[bitfield(u64, order = Lsb)]
#[derive(PartialEq, Eq)]
pub struct Ia32ApicBase {
    #[bits(8)]
    _reserved0: u8,

    /// Bit 8 (BSP): this processor is the bootstrap processor.
    #[bits(access = RO)]
    pub bsp: bool,

    _reserved1: bool,

    /// Bit 10 (EXTD): x2APIC mode enabled.
    pub x2apic: bool,

    /// Bit 11 (EN): APIC globally enabled.
    pub enabled: bool,

    /// Bits 12–51: APIC register page physical base >> 12.
    #[bits(40)]
    base_4k: u64,

    #[bits(12)]
    _reserved2: u16,
}

impl Ia32ApicBase {
    pub const MSR: Msr = Msr::new(0x1B);

    /// Physical address of the xAPIC register page.
    #[must_use]
    pub const fn base_phys(&self) -> u64 {
        self.base_4k() << 12
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Ia32ApicBase {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(unsafe { Self::MSR.load_raw() })
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Ia32ApicBase {
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_default_xapic_base() {
        // Typical reset value on the BSP: enabled, xAPIC, base 0xFEE0_0000.
        let msr = Ia32ApicBase::from_bits(0xFEE0_0900);
        assert!(msr.bsp());
        assert!(msr.enabled());
        assert!(!msr.x2apic());
        assert_eq!(msr.base_phys(), 0xFEE0_0000);
    }

    #[test]
    fn x2apic_bit() {
        let msr = Ia32ApicBase::from_bits(0xFEE0_0D00);
        assert!(msr.x2apic());
    }
}
