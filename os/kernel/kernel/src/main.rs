//! # Kernel Binary
//!
//! Boot flow on the bootstrap processor:
//!
//! 1. [`init::_start_kernel`] moves onto a static boot stack and installs the
//!    logger.
//! 2. The frame allocator is built from the loader's memory map
//!    ([`memory::init_physical_memory`]).
//! 3. The kernel address space is built and activated, and execution moves
//!    onto the freshly mapped kernel stack.
//! 4. The IDT timer gate, the Local APIC and the demo tasks are set up and
//!    interrupts are enabled. From then on every timer tick may switch tasks.
//!
//! The kernel only runs on `x86_64-unknown-none`. Host builds compile the
//! hardware-independent parts for unit tests.

#![cfg_attr(target_os = "none", no_std, no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]
#![allow(unsafe_code)]

mod apic;
mod idt;
#[cfg(target_os = "none")]
mod init;
#[cfg(target_os = "none")]
mod layout;
mod memory;
mod pic;
mod tasks;
mod timer;

#[cfg(not(target_os = "none"))]
fn main() {}

/// Stop this CPU for good.
pub fn halt() -> ! {
    loop {
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("kernel panic: {info}");
    halt()
}
