//! # Legacy 8259 PICs
//!
//! The kernel takes its timer from the Local APIC, so both legacy
//! controllers are remapped off the exception vectors and fully masked.
//!
//! ```text
//! 0x20-0x21   PIC #1 (command, data)
//! 0xA0-0xA1   PIC #2 (command, data)
//! ```

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: initialize, ICW4 follows.
const ICW1_INIT: u8 = 0x11;
/// ICW4: 8086 mode.
const ICW4_8086: u8 = 0x01;

/// First vector of each controller after remapping. Spurious IRQ 7 and 15
/// land in the top of the vector space instead of on CPU exceptions.
const PIC1_OFFSET: u8 = 0xF0;
const PIC2_OFFSET: u8 = 0xF8;

/// Write one byte to an I/O port.
///
/// # Safety
/// Must run with I/O privilege, and `port` must belong to a device that
/// accepts `val` in its current state.
#[inline]
unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}

/// Remap both PICs and mask every line.
///
/// # Safety
/// Must run at CPL0 with interrupts disabled.
pub unsafe fn disable() {
    unsafe {
        outb(PIC1_COMMAND, ICW1_INIT);
        outb(PIC2_COMMAND, ICW1_INIT);
        outb(PIC1_DATA, PIC1_OFFSET);
        outb(PIC2_DATA, PIC2_OFFSET);
        // Cascade: slave on IRQ 2 of the master, which is the slave's identity.
        outb(PIC1_DATA, 1 << 2);
        outb(PIC2_DATA, 2);
        outb(PIC1_DATA, ICW4_8086);
        outb(PIC2_DATA, ICW4_8086);

        outb(PIC1_DATA, 0xFF);
        outb(PIC2_DATA, 0xFF);
    }
}
