//! # Global Memory Contexts
//!
//! The frame allocator and the kernel address space are built once during
//! boot and shared behind spin locks afterwards. Outside the timer interrupt
//! they are locked with [`lock_irq`](kernel_sync::SpinMutex::lock_irq) so a
//! tick can never find them held by the code it interrupted.
//!
//! Single-core only; a second CPU would need the TLB shootdown and per-CPU
//! state this module does not have.

use kernel_alloc::phys_mapper::HhdmPhysMapper;
use kernel_alloc::{FrameStack, PmmError};
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::KERNEL_STACK_BASE;
use kernel_sync::{SpinMutex, SyncOnceCell};
use kernel_task::SchedulerError;
use kernel_vmem::bootstrap::{BootstrapError, BootstrapPlan, KernelSpace, build_kernel_space};
use kernel_vmem::{
    AddressSpace, Invlpg, PageFlags, PageSize, PhysMapper, Size4K, TlbInvalidate, Unmapped,
    VirtualAddress, VmemError, zero_frame,
};
use log::{debug, warn};

pub static MAPPER: HhdmPhysMapper = HhdmPhysMapper;

pub type Pmm = FrameStack<'static, HhdmPhysMapper>;
pub type KernelAddressSpace = AddressSpace<'static, HhdmPhysMapper>;

static PMM: SyncOnceCell<SpinMutex<Pmm>> = SyncOnceCell::new();
static KERNEL_SPACE: SyncOnceCell<SpinMutex<KernelAddressSpace>> = SyncOnceCell::new();

/// Virtual span reserved per task stack, guard page included.
const TASK_STACK_STRIDE: u64 = 0x10_0000;

/// Mapped 4 KiB pages per task stack.
pub const TASK_STACK_PAGES: u64 = 4;

const STACK: PageFlags = PageFlags::new()
    .with_present(true)
    .with_writable(true)
    .with_no_execute(true);

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Pmm(#[from] PmmError),
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("the {0} is already initialized")]
    AlreadyInitialized(&'static str),
    #[error("the {0} is not initialized")]
    NotInitialized(&'static str),
}

/// Build the frame allocator from the loader's memory map.
///
/// # Errors
/// [`PmmError::NoUsableMemory`], or a second call.
///
/// # Safety
/// Usable regions must be free RAM reachable through the direct map.
pub unsafe fn init_physical_memory(
    regions: &[MemoryRegion],
) -> Result<&'static SpinMutex<Pmm>, KernelError> {
    let stack = unsafe { FrameStack::init(&MAPPER, regions)? };
    PMM.set(SpinMutex::new(stack))
        .map_err(|_| KernelError::AlreadyInitialized("frame allocator"))?;
    pmm()
}

/// The global frame allocator.
///
/// # Errors
/// [`KernelError::NotInitialized`] before [`init_physical_memory`].
pub fn pmm() -> Result<&'static SpinMutex<Pmm>, KernelError> {
    PMM.get()
        .ok_or(KernelError::NotInitialized("frame allocator"))
}

/// The kernel's address space.
///
/// # Errors
/// [`KernelError::NotInitialized`] before [`build_kernel_address_space`].
pub fn kernel_space() -> Result<&'static SpinMutex<KernelAddressSpace>, KernelError> {
    KERNEL_SPACE
        .get()
        .ok_or(KernelError::NotInitialized("kernel address space"))
}

/// Build the kernel address space described by `plan` with frames from the
/// global allocator. The result is recorded but not activated.
///
/// # Errors
/// The first failing bootstrap step, or a second call.
pub fn build_kernel_address_space(plan: &BootstrapPlan<'_>) -> Result<KernelSpace, KernelError> {
    let space = {
        let mut pmm = pmm()?.lock_irq();
        build_kernel_space(plan, &MAPPER, &mut *pmm, Invlpg)?
    };

    // SAFETY: the root was just built through MAPPER and nothing else holds it.
    let root = unsafe { AddressSpace::from_root(&MAPPER, space.root, Invlpg) };
    KERNEL_SPACE
        .set(SpinMutex::new(root))
        .map_err(|_| KernelError::AlreadyInitialized("kernel address space"))?;
    Ok(space)
}

/// Lowest address of the stack area for task `slot`; that page is the guard.
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn task_stack_base(slot: u16) -> VirtualAddress {
    VirtualAddress::new(KERNEL_STACK_BASE + TASK_STACK_STRIDE * (slot as u64 + 1))
}

/// Run `f` on the kernel address space and the frame allocator, with
/// interrupts masked for the duration.
///
/// # Errors
/// [`KernelError::NotInitialized`] before the kernel space is built.
pub fn with_kernel_space<R>(
    f: impl FnOnce(&mut KernelAddressSpace, &mut Pmm) -> R,
) -> Result<R, KernelError> {
    let mut pmm = pmm()?.lock_irq();
    let mut space = kernel_space()?.lock_irq();
    Ok(f(&mut space, &mut pmm))
}

/// Map a fresh, zeroed stack for task `slot` and return its top.
///
/// A slot reused after its task terminated still has the old stack mapped;
/// those frames go back to the allocator first.
///
/// # Errors
/// Allocation or mapping failures. Frames mapped before the failure stay
/// mapped.
pub fn map_task_stack(slot: u16) -> Result<VirtualAddress, KernelError> {
    let base = task_stack_base(slot);
    let top = with_kernel_space(|space, pmm| map_stack_pages(space, pmm, &MAPPER, base))??;

    debug!("task stack {slot}: guard at {base}, top at {top}");
    Ok(top)
}

/// Back the [`TASK_STACK_PAGES`] pages above the guard page at `base` with
/// zeroed frames, releasing whatever 4 KiB frames were mapped there.
fn map_stack_pages<M: PhysMapper, T: TlbInvalidate>(
    space: &mut AddressSpace<'_, M, T>,
    pmm: &mut FrameStack<'_, M>,
    mapper: &M,
    base: VirtualAddress,
) -> Result<VirtualAddress, KernelError> {
    let mut va = base + Size4K::SIZE;
    for _ in 0..TASK_STACK_PAGES {
        match space.unmap(va) {
            Unmapped::NotMapped => {}
            Unmapped::Page4K(stale) => {
                debug!("releasing stale stack frame {stale} at {va}");
                pmm.free(stale.base())?;
            }
            other => warn!("stack page {va} was covered by {other:?}"),
        }

        let frame = pmm.allocate()?;
        unsafe { zero_frame(mapper, frame) };
        space.map(pmm, va, frame.base(), STACK)?;
        va += Size4K::SIZE;
    }
    Ok(va)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::{KERNEL_BASE, KERNEL_STACK_TOP};
    use kernel_vmem::test_support::{RecordingTlb, TestPhys};
    use kernel_vmem::{PhysicalAddress, PhysicalPage};

    fn frame(pa: u64) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(PhysicalAddress::new(pa))
    }

    fn stack_frames<M: PhysMapper, T: TlbInvalidate>(
        space: &AddressSpace<'_, M, T>,
        base: VirtualAddress,
    ) -> Vec<PhysicalAddress> {
        (1..=TASK_STACK_PAGES)
            .map(|i| space.translate(base + i * Size4K::SIZE).unwrap().phys)
            .collect()
    }

    #[test]
    fn task_stacks_sit_between_the_boot_stack_and_the_image() {
        assert!(task_stack_base(0).as_u64() >= KERNEL_STACK_TOP);
        let last = task_stack_base(u16::MAX).as_u64();
        assert!(last + Size4K::SIZE * (TASK_STACK_PAGES + 1) < KERNEL_BASE);
        assert!(Size4K::SIZE * (TASK_STACK_PAGES + 1) <= TASK_STACK_STRIDE);
        assert_eq!(
            task_stack_base(3) - task_stack_base(2),
            TASK_STACK_STRIDE
        );
    }

    #[test]
    fn reusing_a_slot_releases_the_old_stack() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut pmm = unsafe { FrameStack::with_first_node(&phys, frame(0x20_0000)) };
        pmm.add_region(0x100_0000, 64 * 4096);
        let mut space = AddressSpace::new(&phys, &mut pmm, &tlb).unwrap();
        let base = task_stack_base(1);

        let top = map_stack_pages(&mut space, &mut pmm, &phys, base).unwrap();
        assert_eq!(top, base + Size4K::SIZE * (TASK_STACK_PAGES + 1));
        assert!(space.translate(base).is_none(), "guard page must stay unmapped");
        let first = stack_frames(&space, base);
        let free = pmm.free_count();

        // Leave something on the old stack.
        phys.write_u64(first[0].as_u64(), 0xDEAD_BEEF);

        let again = map_stack_pages(&mut space, &mut pmm, &phys, base).unwrap();
        assert_eq!(again, top);
        assert_eq!(pmm.free_count(), free, "old stack frames leaked");

        let second = stack_frames(&space, base);
        assert_eq!(second.len(), first.len());
        for pa in &second {
            assert_eq!(phys.read_u64(pa.as_u64()), 0);
        }
    }
}
