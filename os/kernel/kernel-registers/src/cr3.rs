use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3: Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Holds the physical base address of the PML4 table and cache-control flags
/// for PML4 walks. Assumes CR4.PCIDE = 0.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0–2: Reserved (must be 0).
    #[bits(3)]
    _reserved0: u8,

    /// Bit 3 (PWT): Page-level Write-Through for PML4.
    pub pwt: bool,

    /// Bit 4 (PCD): Page-level Cache Disable for PML4.
    pub pcd: bool,

    /// Bits 5–11: Reserved (must be 0 when written).
    #[bits(7)]
    _reserved1: u8,

    /// Bits 12–51: PML4 physical base >> 12.
    #[bits(40)]
    pml4_base_4k: u64,

    /// Bits 52–63: Reserved.
    #[bits(12)]
    _reserved2: u16,
}

impl Cr3 {
    /// CR3 value selecting the PML4 at `pml4` with write-back caching.
    #[must_use]
    pub const fn from_pml4(pml4: PhysicalPage<Size4K>) -> Self {
        Self::new().with_pml4_base_4k(pml4.as_u64() >> 12)
    }

    /// The physical frame holding the PML4.
    #[must_use]
    pub const fn pml4(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(PhysicalAddress::new(self.pml4_base_4k() << 12))
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pml4_base_occupies_bits_12_to_51() {
        let pml4 = PhysicalPage::containing(PhysicalAddress::new(0x0000_0001_2345_6000));
        let cr3 = Cr3::from_pml4(pml4);
        assert_eq!(cr3.into_bits(), 0x0000_0001_2345_6000);
        assert_eq!(cr3.pml4(), pml4);
    }

    #[test]
    fn flags_do_not_leak_into_base() {
        let cr3 = Cr3::from_bits(0x0000_0000_0040_0018);
        assert!(cr3.pwt());
        assert!(cr3.pcd());
        assert_eq!(cr3.pml4().as_u64(), 0x40_0000);
    }
}
