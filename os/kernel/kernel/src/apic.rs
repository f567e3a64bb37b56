//! # Local APIC
//!
//! Just enough of the Local APIC to run a periodic timer and acknowledge it.
//! The register file is reached through MSRs when the CPU supports x2APIC
//! and through the memory-mapped page (seen via the direct map) otherwise.
//!
//! | Register        | xAPIC offset | x2APIC MSR |
//! |-----------------|--------------|------------|
//! | ID              | `0x020`      | `0x802`    |
//! | EOI             | `0x0B0`      | `0x80B`    |
//! | Spurious vector | `0x0F0`      | `0x80F`    |
//! | LVT timer       | `0x320`      | `0x832`    |
//! | Initial count   | `0x380`      | `0x838`    |
//! | Divide config   | `0x3E0`      | `0x83E`    |

use bitfield_struct::bitfield;
use kernel_registers::msr::{Ia32ApicBase, Msr};
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_sync::SyncOnceCell;
use kernel_task::EndOfInterrupt;
use kernel_vmem::VirtualAddress;
use log::info;

/// Divide configuration for a divide-by-16 timer clock.
pub const DIVIDE_BY_16: u32 = 0b0011;

/// Vector the APIC reports spurious interrupts on.
pub const SPURIOUS_VECTOR: u8 = 0xFF;

/// Spurious-vector register bit that software-enables the APIC.
const SVR_APIC_ENABLE: u32 = 1 << 8;

/// Register index shared by both access modes.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    Id = 0x02,
    Eoi = 0x0B,
    SpuriousVector = 0x0F,
    LvtTimer = 0x32,
    InitialCount = 0x38,
    DivideConfig = 0x3E,
}

impl Register {
    #[must_use]
    pub const fn msr(self) -> Msr {
        Msr::new(0x800 + self as u32)
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn mmio_offset(self) -> u64 {
        (self as u64) << 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerMode {
    OneShot = 0b00,
    Periodic = 0b01,
    TscDeadline = 0b10,
}

impl TimerMode {
    const fn into_bits(self) -> u8 {
        self as u8
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0b01 => Self::Periodic,
            0b10 => Self::TscDeadline,
            _ => Self::OneShot,
        }
    }
}

/// LVT timer register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct LvtTimer {
    pub vector: u8,

    #[bits(4)]
    _reserved0: u8,

    /// Set while an interrupt is pending delivery.
    #[bits(1, access = RO)]
    pub delivery_pending: bool,

    #[bits(3)]
    _reserved1: u8,

    pub masked: bool,

    #[bits(2)]
    pub mode: TimerMode,

    #[bits(13)]
    _reserved2: u16,
}

/// How the register file is reached.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LapicMode {
    X2Apic,
    /// `base` maps the xAPIC register page.
    XApic { base: VirtualAddress },
}

#[derive(Debug)]
pub struct Lapic {
    mode: LapicMode,
}

impl Lapic {
    /// # Safety
    /// `mode` must match how the running CPU's APIC is enabled, and an xAPIC
    /// base must map the register page uncached.
    #[must_use]
    pub const unsafe fn new(mode: LapicMode) -> Self {
        Self { mode }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read(&self, reg: Register) -> u32 {
        match self.mode {
            LapicMode::X2Apic => unsafe { reg.msr().load_raw() as u32 },
            LapicMode::XApic { base } => unsafe {
                core::ptr::read_volatile((base + reg.mmio_offset()).as_mut_ptr::<u32>())
            },
        }
    }

    fn write(&self, reg: Register, value: u32) {
        match self.mode {
            LapicMode::X2Apic => unsafe { reg.msr().store_raw(u64::from(value)) },
            LapicMode::XApic { base } => unsafe {
                core::ptr::write_volatile((base + reg.mmio_offset()).as_mut_ptr::<u32>(), value);
            },
        }
    }

    /// The APIC ID of this CPU.
    #[must_use]
    pub fn id(&self) -> u32 {
        let raw = self.read(Register::Id);
        match self.mode {
            LapicMode::X2Apic => raw,
            LapicMode::XApic { .. } => raw >> 24,
        }
    }

    /// Software-enable the APIC.
    pub fn enable(&self) {
        self.write(
            Register::SpuriousVector,
            SVR_APIC_ENABLE | u32::from(SPURIOUS_VECTOR),
        );
    }

    /// Fire `vector` every `initial_count` ticks of the bus clock divided by 16.
    pub fn start_periodic_timer(&self, vector: u8, initial_count: u32) {
        let lvt = LvtTimer::new()
            .with_vector(vector)
            .with_mode(TimerMode::Periodic);

        self.write(Register::LvtTimer, lvt.with_masked(true).into_bits());
        self.write(Register::DivideConfig, DIVIDE_BY_16);
        self.write(Register::InitialCount, initial_count);
        self.write(Register::LvtTimer, lvt.into_bits());
    }

    pub fn eoi(&self) {
        self.write(Register::Eoi, 0);
    }
}

impl EndOfInterrupt for Lapic {
    fn end_of_interrupt(&self) {
        self.eoi();
    }
}

static LAPIC: SyncOnceCell<Lapic> = SyncOnceCell::new();

/// The initialized Local APIC.
pub fn lapic() -> Option<&'static Lapic> {
    LAPIC.get()
}

/// Physical address of the xAPIC register page.
///
/// # Safety
/// Must run at CPL0.
pub unsafe fn xapic_phys_base() -> u64 {
    unsafe { Ia32ApicBase::load_unsafe() }.base_phys()
}

/// Enable the Local APIC of this CPU, preferring x2APIC. Later calls return
/// the first instance.
///
/// # Safety
/// Must run at CPL0. Without x2APIC the register page must be mapped at
/// `hhdm_base` plus [`xapic_phys_base`].
pub unsafe fn init(hhdm_base: u64) -> &'static Lapic {
    LAPIC.get_or_init(|| {
        let mut msr = unsafe { Ia32ApicBase::load_unsafe() }.with_enabled(true);
        let mode = if cpu_has_x2apic() {
            msr.set_x2apic(true);
            LapicMode::X2Apic
        } else {
            LapicMode::XApic {
                base: VirtualAddress::new(hhdm_base + msr.base_phys()),
            }
        };
        unsafe { msr.store_unsafe() };

        let lapic = unsafe { Lapic::new(mode) };
        lapic.enable();
        info!("Local APIC {} enabled in {mode:?} mode", lapic.id());
        lapic
    })
}

/// CPUID.01H:ECX\[21\].
fn cpu_has_x2apic() -> bool {
    let ecx: u32;
    unsafe {
        core::arch::asm!(
            "push rbx",
            "cpuid",
            "pop rbx",
            inlateout("eax") 1u32 => _,
            inlateout("ecx") 0u32 => ecx,
            lateout("edx") _,
            options(nomem, preserves_flags),
        );
    }
    ecx & (1 << 21) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_locations() {
        assert_eq!(Register::Eoi.msr().raw(), 0x80B);
        assert_eq!(Register::Eoi.mmio_offset(), 0xB0);
        assert_eq!(Register::LvtTimer.msr().raw(), 0x832);
        assert_eq!(Register::LvtTimer.mmio_offset(), 0x320);
        assert_eq!(Register::DivideConfig.mmio_offset(), 0x3E0);
        assert_eq!(Register::Id.msr().raw(), 0x802);
    }

    #[test]
    fn periodic_timer_encoding() {
        let lvt = LvtTimer::new()
            .with_vector(32)
            .with_mode(TimerMode::Periodic);
        assert_eq!(lvt.into_bits(), 0x0002_0020);
        assert_eq!(lvt.with_masked(true).into_bits(), 0x0003_0020);

        let decoded = LvtTimer::from_bits(0x0002_1020);
        assert!(decoded.delivery_pending());
        assert_eq!(decoded.mode(), TimerMode::Periodic);
        assert_eq!(decoded.vector(), 32);
    }
}
