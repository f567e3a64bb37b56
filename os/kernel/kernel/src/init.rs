//! # Boot Path
//!
//! ```text
//!  loader ──► _start_kernel ──► kernel_entry_on_boot_stack ──► trampoline ──► stage_two
//!             (boot stack)      (PMM, kernel space, IDT,       (new stack)    (PIC, APIC,
//!                                NXE, IDTR, CR3)                               tasks, sti)
//! ```
//!
//! Everything taken from the loader (memory map, framebuffer, load address)
//! is consumed before CR3 changes: the loader's own memory is not part of
//! the kernel address space. What the second stage needs travels in a
//! [`Handoff`] that lives in the kernel image.

use crate::idt::{self, Idt, current_cs};
use crate::memory::{self, KernelError, build_kernel_address_space, init_physical_memory};
use crate::{apic, halt, layout, pic, tasks, timer};
use kernel_info::boot::{KernelBootInfo, MemoryRegion};
use kernel_info::memory::{
    HHDM_BASE, KERNEL_STACK_BASE, KERNEL_STACK_PAGES, TIMER_INITIAL_COUNT, TIMER_VECTOR,
};
use kernel_qemu::QemuLogger;
use kernel_registers::efer::Efer;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_sync::SyncOnceCell;
use kernel_sync::irq::sti_enable_interrupts;
use kernel_task::Cr3;
use kernel_vmem::bootstrap::{BootstrapPlan, KernelSpace, PhysRange};
use kernel_vmem::{PageSize, Size4K, VirtualAddress};
use log::{LevelFilter, debug, error, info};

/// Stack the kernel runs on until its own stack is mapped.
pub const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct Aligned16<const N: usize>([u8; N]);

/// Early boot stack of the bootstrap processor. Only [`_start_kernel`]
/// touches it, and only until the trampoline moves to the kernel stack.
#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned16<BOOT_STACK_SIZE> = Aligned16([0; BOOT_STACK_SIZE]);

const _: () = assert!(BOOT_STACK_SIZE.is_multiple_of(16));

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);

/// State carried into the kernel address space.
#[repr(C)]
struct Handoff {
    space: KernelSpace,
    /// Direct-map alias of the IDT.
    idt_alias: VirtualAddress,
}

static HANDOFF: SyncOnceCell<Handoff> = SyncOnceCell::new();

/// The kernel entry point.
///
/// The loader jumps here with the boot info pointer in `RDI` (SysV). The
/// function is naked so no Rust code runs before `RSP` points at
/// [`BOOT_STACK`].
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "sysv64" fn _start_kernel(_boot_info: *const KernelBootInfo) -> ! {
    core::arch::naked_asm!(
        "cli",
        "mov r12, rdi",
        "lea rax, [rip + {stack_sym}]",
        "add rax, {stack_size}",
        "and rax, -16",
        "mov rsp, rax",
        // Fake return address so the entry sees RSP % 16 == 8.
        "push 0",
        "xor rbp, rbp",
        "mov rdi, r12",
        "jmp {rust_entry}",
        stack_sym = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        rust_entry = sym kernel_entry_on_boot_stack,
    );
}

extern "C" fn kernel_entry_on_boot_stack(boot_info: *const KernelBootInfo) -> ! {
    if LOGGER.init().is_err() {
        kernel_qemu::qemu_trace!("a logger was already installed\n");
    }
    info!("Kernel reporting to QEMU! Bootstrapping the bootstrap processor.");

    // SAFETY: the loader passes a valid boot info that outlives this stage.
    let bi = unsafe { &*boot_info };
    let handoff = match prepare_kernel_space(bi) {
        Ok(handoff) => handoff,
        Err(e) => {
            error!("bootstrap failed: {e}");
            halt()
        }
    };

    let space = match memory::kernel_space() {
        Ok(space) => space,
        Err(e) => {
            error!("bootstrap failed: {e}");
            halt()
        }
    };

    info!("Switching to the kernel address space ...");
    unsafe {
        let efer = Efer::load_unsafe().with_nxe(true);
        efer.store_unsafe();
        idt::load(handoff.idt_alias);
        space.lock_irq().activate();
        switch_to_stack_and_enter(handoff.space.stack_top, stage_two, handoff);
    }
}

/// Build the frame allocator, the IDT and the kernel address space from
/// the boot info.
fn prepare_kernel_space(bi: &KernelBootInfo) -> Result<&'static Handoff, KernelError> {
    let regions = unsafe { memory_map(bi) };
    debug!("memory map holds {} regions", regions.len());

    let pmm = unsafe { init_physical_memory(regions)? };
    {
        let pmm = pmm.lock_irq();
        info!(
            "{} free frames ({} MiB) in {} nodes",
            pmm.free_count(),
            pmm.free_count() * Size4K::SIZE / 1024 / 1024,
            pmm.node_count()
        );
    }

    let mut table = Idt::new();
    timer::install_gates(&mut table, current_cs());
    if !idt::install(table) {
        return Err(KernelError::AlreadyInitialized("IDT"));
    }
    let idt_image = idt::installed().ok_or(KernelError::NotInitialized("IDT"))?;

    let image = layout::kernel_image(bi);
    let idt_phys = image.phys_of(idt_image);
    let mmio = [PhysRange::new(unsafe { apic::xapic_phys_base() }, Size4K::SIZE)];

    let plan = BootstrapPlan {
        hhdm_base: HHDM_BASE,
        image,
        regions,
        framebuffer: bi.fb.is_linear().then(|| bi.fb.clone()),
        mmio: &mmio,
        idt: Some(PhysRange {
            base: idt_phys,
            len: size_of::<Idt>() as u64,
        }),
        // Execution is already on the boot stack inside the image.
        loader_stack: None,
        stack_base: VirtualAddress::new(KERNEL_STACK_BASE),
        stack_pages: KERNEL_STACK_PAGES,
    };
    let space = build_kernel_address_space(&plan)?;
    if let Some(fb) = space.framebuffer {
        info!("framebuffer mapped at {fb}");
    }

    HANDOFF
        .set(Handoff {
            space,
            idt_alias: VirtualAddress::new(HHDM_BASE + idt_phys.as_u64()),
        })
        .map_err(|_| KernelError::AlreadyInitialized("boot handoff"))?;
    HANDOFF.get().ok_or(KernelError::NotInitialized("boot handoff"))
}

/// The loader's memory map.
///
/// # Safety
/// `bi.mmap` must describe a readable array of regions.
#[allow(clippy::cast_possible_truncation)]
unsafe fn memory_map(bi: &KernelBootInfo) -> &[MemoryRegion] {
    let ptr = bi.mmap.regions_ptr as *const MemoryRegion;
    if ptr.is_null() {
        return &[];
    }
    unsafe { core::slice::from_raw_parts(ptr, bi.mmap.regions_len as usize) }
}

/// Set `RSP` to `top` and tail-jump to `entry(handoff, top)`.
///
/// ```text
/// mov r11, rsi      ; keep entry
/// mov rsp, rdi      ; switch stacks
/// push 0            ; RSP % 16 == 8, as after a call
/// mov rsi, rdi      ; second argument: top
/// mov rdi, rdx      ; first argument: handoff
/// jmp r11
/// ```
///
/// # Safety
/// `top` must be the end of a mapped, writable stack and interrupts must
/// be disabled.
#[unsafe(naked)]
unsafe extern "C" fn switch_to_stack_and_enter(
    _top: VirtualAddress,
    _entry: extern "C" fn(*const Handoff, VirtualAddress) -> !,
    _handoff: *const Handoff,
) -> ! {
    core::arch::naked_asm!(
        "mov r11, rsi",
        "mov rsp, rdi",
        "push 0",
        "mov rsi, rdi",
        "mov rdi, rdx",
        "jmp r11",
    )
}

extern "C" fn stage_two(handoff: *const Handoff, stack_top: VirtualAddress) -> ! {
    info!("Running in the kernel address space, stack top at {stack_top}.");

    // SAFETY: the handoff lives in a static of the kernel image.
    let handoff = unsafe { &*handoff };
    if let Err(e) = start_scheduling(handoff) {
        error!("kernel init failed: {e}");
        halt()
    }

    info!("Enabling interrupts ...");
    sti_enable_interrupts();
    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }
}

fn start_scheduling(handoff: &Handoff) -> Result<(), KernelError> {
    unsafe { pic::disable() };
    let lapic = unsafe { apic::init(HHDM_BASE) };

    tasks::spawn_demo_tasks(Cr3::from_pml4(handoff.space.root))?;

    info!("Arming the timer on vector {TIMER_VECTOR} ...");
    lapic.start_periodic_timer(TIMER_VECTOR, TIMER_INITIAL_COUNT);
    Ok(())
}
