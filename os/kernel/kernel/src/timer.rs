//! # Timer Interrupt
//!
//! The Local APIC timer fires [`TIMER_VECTOR`] periodically. The naked
//! [`timer_entry`] stub turns the interrupted state into a [`TrapFrame`] on
//! the current stack and hands it to [`handle_timer_tick`], which may
//! overwrite it with another task's state before the stub returns through
//! `iretq`.

use crate::apic::{self, SPURIOUS_VECTOR};
use crate::idt::{Idt, IdtEntry};
use crate::tasks;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::memory::TIMER_VECTOR;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_sync::SpinMutex;
use kernel_task::{Cr3, PageTableBase, SwitchOutcome, TrapFrame, handle_timer_tick};
use log::trace;

/// Timer interrupts taken since boot.
pub static TICKS: AtomicU64 = AtomicU64::new(0);

/// Vectors the masked legacy PICs report spurious IRQ 7 and 15 on.
const PIC_SPURIOUS: [u8; 2] = [0xF7, 0xFF];

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Install the timer gate and a silent gate for each spurious vector.
pub fn install_gates(idt: &mut Idt, cs: u16) {
    idt.set(
        TIMER_VECTOR,
        IdtEntry::interrupt_gate(timer_entry as usize as u64, cs),
    );
    for vector in PIC_SPURIOUS.into_iter().chain([SPURIOUS_VECTOR]) {
        idt.set(
            vector,
            IdtEntry::interrupt_gate(spurious_entry as usize as u64, cs),
        );
    }
}

/// Timer entry stub.
///
/// Pushes the error code placeholder and the vector so every vector shares
/// the [`TrapFrame`] layout, then the general-purpose registers. `rbp`
/// keeps the frame address across the call while `rsp` is aligned to
/// 16 bytes for the SysV call.
#[unsafe(naked)]
pub extern "C" fn timer_entry() {
    core::arch::naked_asm!(
        "cld",
        "push 0",
        "push {vector}",
        "push rax","push rbx","push rcx","push rdx","push rsi","push rdi","push rbp",
        "push r8","push r9","push r10","push r11","push r12","push r13","push r14","push r15",

        "mov rdi, rsp",
        "mov rbp, rsp",
        "and rsp, -16",
        "call {handler}",
        "mov rsp, rbp",

        "pop r15","pop r14","pop r13","pop r12","pop r11","pop r10","pop r9","pop r8",
        "pop rbp","pop rdi","pop rsi","pop rdx","pop rcx","pop rbx","pop rax",
        "add rsp, 16",
        "iretq",

        vector = const TIMER_VECTOR,
        handler = sym timer_tick,
    )
}

/// Spurious interrupts need neither an EOI nor any state.
#[unsafe(naked)]
pub extern "C" fn spurious_entry() {
    core::arch::naked_asm!("iretq")
}

/// CR3 of the running CPU.
struct LiveCr3;

impl PageTableBase for LiveCr3 {
    fn read(&self) -> Cr3 {
        unsafe { Cr3::load_unsafe() }
    }

    fn write(&mut self, cr3: Cr3) {
        unsafe { cr3.store_unsafe() }
    }
}

extern "C" fn timer_tick(frame: *mut TrapFrame) {
    let tick = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    let Some(lapic) = apic::lapic() else {
        return;
    };

    // SAFETY: the entry stub passes the frame it built on this stack.
    let frame = unsafe { &mut *frame };
    match tasks::scheduler().and_then(SpinMutex::try_lock) {
        Some(mut scheduler) => {
            let outcome = handle_timer_tick(frame, &mut *scheduler, &mut LiveCr3, lapic);
            if let SwitchOutcome::Switched {
                from,
                to,
                kernel_stack_top,
                ..
            } = outcome
            {
                // No ring 3 yet, so there is no TSS to load RSP0 into.
                trace!("tick {tick}: {from:?} -> {to}, rsp0 {kernel_stack_top:?}");
            }
        }
        None => lapic.eoi(),
    }
}
