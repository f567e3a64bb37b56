use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// IDTR: Interrupt Descriptor Table Register, as stored by `sidt`.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct Idtr {
    /// Size of the table in bytes, minus one.
    pub limit: u16,
    /// Linear (virtual) address of the first gate.
    pub base: u64,
}

impl Idtr {
    #[must_use]
    pub const fn new(base: u64, limit: u16) -> Self {
        Self { limit, base }
    }

    /// Byte length of the descriptor table.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn len(&self) -> u64 {
        self.limit as u64 + 1
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Same limit, relocated to `base`.
    #[must_use]
    pub const fn with_base(self, base: u64) -> Self {
        Self {
            limit: self.limit,
            base,
        }
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Idtr {
    unsafe fn load_unsafe() -> Self {
        let mut idtr = Self::new(0, 0);
        unsafe {
            core::arch::asm!(
                "sidt [{}]",
                in(reg) &raw mut idtr,
                options(nostack, preserves_flags)
            );
        }
        idtr
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Idtr {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!(
                "lidt [{}]",
                in(reg) &raw const self,
                options(readonly, nostack, preserves_flags)
            );
        }
    }
}
