//! # Interrupt Descriptor Table (IDT)
//!
//! One 256-entry table for the bootstrap processor. Only the timer gate is
//! installed; an exception on any other vector escalates to a triple fault.
//!
//! The table lives in the kernel's `.bss` and is written through its image
//! address. The CPU reads it through a read-only alias in the direct map,
//! which is what [`load`] hands to `lidt`.
//!
//! ```text
//! 127            96 95                    64 63    48 47 46 45 44 43  40 39 35 34 32 31   16 15    0
//! |     zero      |     offset[63:32]      | off   | P | DPL |0 | type |  0  | IST | sel   | off   |
//!                                            [31:16]                                        [15:0]
//! ```

use bitfield_struct::bitfield;
use kernel_registers::StoreRegisterUnsafe;
use kernel_registers::idtr::Idtr;
use kernel_sync::SyncOnceCell;
use kernel_vmem::VirtualAddress;

const _: () = assert!(size_of::<IdtEntry>() == 16);
const _: () = assert!(align_of::<Idt>() == 16);

/// IST index and type/attribute byte of a gate.
#[bitfield(u16)]
pub struct IdtGateAttr {
    /// Interrupt Stack Table slot; 0 keeps the current stack.
    #[bits(3)]
    pub ist: u8,

    #[bits(5)]
    __zero0: u8,

    /// 0xE interrupt gate (clears IF), 0xF trap gate.
    #[bits(4)]
    pub typ: u8,

    #[bits(1)]
    pub s: bool,

    #[bits(2)]
    pub dpl: u8,

    #[bits(1)]
    pub present: bool,
}

impl IdtGateAttr {
    /// Present ring-0 interrupt gate without IST.
    #[must_use]
    pub const fn kernel_interrupt_gate() -> Self {
        Self::new().with_typ(0xE).with_present(true)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    attr: u16,
    offset_mid: u16,
    offset_hi: u32,
    zero: u32,
}

impl IdtEntry {
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        attr: 0,
        offset_mid: 0,
        offset_hi: 0,
        zero: 0,
    };

    /// An interrupt gate entering `handler` through code segment `selector`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn interrupt_gate(handler: u64, selector: u16) -> Self {
        Self {
            offset_lo: handler as u16,
            selector,
            attr: IdtGateAttr::kernel_interrupt_gate().into_bits(),
            offset_mid: (handler >> 16) as u16,
            offset_hi: (handler >> 32) as u32,
            zero: 0,
        }
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn handler(&self) -> u64 {
        ((self.offset_hi as u64) << 32) | ((self.offset_mid as u64) << 16) | self.offset_lo as u64
    }

    #[must_use]
    pub const fn attr(&self) -> IdtGateAttr {
        IdtGateAttr::from_bits(self.attr)
    }
}

#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Idt {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    pub fn set(&mut self, vector: u8, entry: IdtEntry) {
        self.entries[usize::from(vector)] = entry;
    }

    #[must_use]
    pub fn get(&self, vector: u8) -> &IdtEntry {
        &self.entries[usize::from(vector)]
    }
}

static IDT: SyncOnceCell<Idt> = SyncOnceCell::new();

/// Store the table. Later calls are ignored and return `false`.
pub fn install(idt: Idt) -> bool {
    IDT.set(idt).is_ok()
}

/// Image address of the installed table.
pub fn installed() -> Option<VirtualAddress> {
    IDT.get().map(|idt| VirtualAddress::from_ptr(idt))
}

/// Point IDTR at `alias`, an address that maps the installed table.
///
/// # Safety
/// `alias` must map the table installed with [`install`] for as long as
/// interrupts can arrive.
pub unsafe fn load(alias: VirtualAddress) {
    #[allow(clippy::cast_possible_truncation)]
    let idtr = Idtr::new(alias.as_u64(), (size_of::<Idt>() - 1) as u16);
    unsafe { idtr.store_unsafe() };
}

/// The code segment the kernel runs in; gates reuse the loader's GDT.
pub fn current_cs() -> u16 {
    let cs: u16;
    unsafe {
        core::arch::asm!("mov {0:x}, cs", out(reg) cs, options(nomem, nostack, preserves_flags));
    }
    cs
}

/// The stack segment the kernel runs in.
pub fn current_ss() -> u16 {
    let ss: u16;
    unsafe {
        core::arch::asm!("mov {0:x}, ss", out(reg) ss, options(nomem, nostack, preserves_flags));
    }
    ss
}
