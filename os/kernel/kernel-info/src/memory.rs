//! # Memory Layout

/// Higher Half Direct Map (HHDM) base.
///
/// Every physical page `pa` the kernel touches is reachable at
/// `HHDM_BASE + pa`, both under the loader's tables and after the switch
/// to the kernel's own address space.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the kernel image is placed in *physical* memory (LMA).
///
/// The loader reports the actual load address in
/// [`KernelBootInfo::kernel_phys_base`](crate::boot::KernelBootInfo::kernel_phys_base);
/// this is the value the linker script assumes.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Preferred physical frame for the first free-frame stack node.
pub const FIRST_NODE_HINT: u64 = 0x0020_0000; // 2 MiB

/// Lowest virtual address of the kernel stack region (the guard page).
pub const KERNEL_STACK_BASE: u64 = 0xffff_ff00_0000_0000;

/// Number of 4 KiB frames backing the kernel stack.
pub const KERNEL_STACK_PAGES: usize = 16;

/// The size of the kernel stack.
pub const KERNEL_STACK_SIZE: usize = KERNEL_STACK_PAGES * 4096;

/// Unmapped page below the kernel stack that turns an overflow into a fault.
pub const KERNEL_STACK_GUARD: u64 = 4096;

/// Initial (highest) stack pointer of the kernel stack.
pub const KERNEL_STACK_TOP: u64 = KERNEL_STACK_BASE + KERNEL_STACK_GUARD + KERNEL_STACK_SIZE as u64;

/// Interrupt vector the periodic timer is routed to.
pub const TIMER_VECTOR: u8 = 32;

/// Initial count loaded into the Local APIC timer (divide-by-16).
pub const TIMER_INITIAL_COUNT: u32 = 10_000_000;

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(FIRST_NODE_HINT.is_multiple_of(4096));
    assert!(FIRST_NODE_HINT != 0);
    assert!(KERNEL_STACK_BASE > HHDM_BASE);
    assert!(KERNEL_STACK_TOP < KERNEL_BASE);
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(TIMER_VECTOR >= 32);
};
