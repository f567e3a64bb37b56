use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_EFER` (MSR `0xC000_0080`), Extended Feature Enable Register.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Efer {
    /// Bit 0 (SCE): System Call Extensions.
    pub sce: bool,

    /// Bits 1–7: Reserved or model-specific.
    #[bits(7)]
    _reserved0: u8,

    /// Bit 8 (LME): Long Mode Enable.
    pub lme: bool,

    /// Bit 9: Reserved.
    _reserved1: bool,

    /// Bit 10 (LMA): Long Mode Active (read-only).
    #[bits(access = RO)]
    pub lma: bool,

    /// Bit 11 (NXE): No-Execute Enable.
    ///
    /// Must be set before any page table entry carries the NX bit, otherwise
    /// the entry is treated as having a reserved bit set and faults.
    pub nxe: bool,

    /// Bits 12–63: other extensions, preserved as-is.
    #[bits(52)]
    _other: u64,
}

impl Efer {
    /// MSR index for `IA32_EFER`.
    pub const MSR: Msr = Msr::new(0xC000_0080);
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Efer {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(unsafe { Self::MSR.load_raw() })
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Efer {
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}
