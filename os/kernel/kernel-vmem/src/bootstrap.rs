//! # Kernel Address Space Bootstrap
//!
//! Builds the page tables the kernel runs on after leaving the loader's
//! tables. Everything here only writes page tables through a
//! [`PhysMapper`]; loading CR3 and jumping to the higher half is left to the
//! kernel binary.
//!
//! The resulting space contains:
//!
//! | Region | Virtual address | Flags |
//! |--------|-----------------|-------|
//! | kernel `.text` | link address | `P` |
//! | kernel `.rodata` | link address | `P NX` |
//! | kernel `.data`/`.bss` | link address | `P W NX` |
//! | usable RAM | `HHDM + phys` (2 MiB where aligned) | `P W NX` |
//! | framebuffer | `HHDM + phys` | `P W NX` |
//! | MMIO | `HHDM + phys` | `P W NX PCD` |
//! | IDT | `HHDM + phys` | `P NX` |
//! | allocator bookkeeping | `HHDM + phys` | `P W NX` |
//! | kernel stack | above an unmapped guard page | `P W NX` |
//! | loader stack page | its current address | `P W NX` |
//!
//! HHDM pages that the direct map already resolves to the same frame are
//! skipped.

use crate::{
    AddressSpace, BookkeepingFrames, FrameAlloc, PageFlags, PhysMapper, TlbInvalidate, VmemError,
    align_down, align_up, zero_frame,
};
use core::ops::Range;
use kernel_info::boot::{FramebufferInfo, MemoryRegion};
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size2M, Size4K, VirtualAddress,
};
use log::{debug, info};

const TEXT: PageFlags = PageFlags::PRESENT;
const RODATA: PageFlags = PageFlags::new().with_present(true).with_no_execute(true);
const DATA: PageFlags = PageFlags::new()
    .with_present(true)
    .with_writable(true)
    .with_no_execute(true);
const MMIO: PageFlags = DATA.with_cache_disable(true);

/// Where the kernel image lives, virtually and physically.
///
/// Section ranges are virtual and must start on page boundaries (the linker
/// script aligns them); ends are rounded up.
#[derive(Debug, Clone)]
pub struct KernelImage {
    pub virt_base: VirtualAddress,
    pub phys_base: PhysicalAddress,
    pub text: Range<VirtualAddress>,
    pub rodata: Range<VirtualAddress>,
    /// `.data` through the end of `.bss`.
    pub data: Range<VirtualAddress>,
}

impl KernelImage {
    /// Physical address backing the image address `va`.
    #[inline]
    #[must_use]
    pub fn phys_of(&self, va: VirtualAddress) -> PhysicalAddress {
        self.phys_base + (va - self.virt_base)
    }
}

/// A physical byte range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PhysRange {
    pub base: PhysicalAddress,
    pub len: u64,
}

impl PhysRange {
    #[must_use]
    pub const fn new(base: u64, len: u64) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            len,
        }
    }
}

/// Inputs of [`build_kernel_space`].
#[derive(Debug, Clone)]
pub struct BootstrapPlan<'a> {
    /// Virtual base of the direct map of physical memory.
    pub hhdm_base: u64,
    pub image: KernelImage,
    /// The firmware memory map; usable regions are direct-mapped.
    pub regions: &'a [MemoryRegion],
    pub framebuffer: Option<FramebufferInfo>,
    pub mmio: &'a [PhysRange],
    /// Physical location of the IDT, aliased into the direct map.
    pub idt: Option<PhysRange>,
    /// A stack address the caller is running on, and its backing address.
    pub loader_stack: Option<(VirtualAddress, PhysicalAddress)>,
    /// Lowest address of the kernel stack area; this page stays unmapped.
    pub stack_base: VirtualAddress,
    pub stack_pages: usize,
}

/// The finished kernel address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelSpace {
    pub root: PhysicalPage<Size4K>,
    /// One past the highest stack byte; the initial `rsp`.
    pub stack_top: VirtualAddress,
    pub framebuffer: Option<VirtualAddress>,
}

/// A failed bootstrap step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("mapping the {what} at {va} failed: {source}")]
    Map {
        what: &'static str,
        va: VirtualAddress,
        source: VmemError,
    },
    #[error("out of memory for the {0}")]
    OutOfMemory(&'static str),
}

/// Incrementally maps the kernel's address space.
///
/// The allocator is passed to every call so that callers can inspect it
/// between steps.
pub struct KernelSpaceBuilder<'m, M: PhysMapper, T: TlbInvalidate> {
    space: AddressSpace<'m, M, T>,
    hhdm_base: u64,
}

impl<'m, M: PhysMapper, T: TlbInvalidate> KernelSpaceBuilder<'m, M, T> {
    /// Start from an empty PML4.
    ///
    /// # Errors
    /// [`BootstrapError::OutOfMemory`] if the root table cannot be allocated.
    pub fn new<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        tlb: T,
        hhdm_base: u64,
    ) -> Result<Self, BootstrapError> {
        let space = AddressSpace::new(mapper, alloc, tlb)
            .map_err(|_| BootstrapError::OutOfMemory("root page table"))?;
        debug!("kernel PML4 at {}", space.root());
        Ok(Self { space, hhdm_base })
    }

    #[must_use]
    pub const fn space(&self) -> &AddressSpace<'m, M, T> {
        &self.space
    }

    /// The direct-map alias of `pa`.
    #[inline]
    #[must_use]
    pub const fn hhdm(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.hhdm_base + pa.as_u64())
    }

    fn map_4k<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        what: &'static str,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), BootstrapError> {
        self.space
            .map(alloc, va, pa, flags)
            .map_err(|source| BootstrapError::Map { what, va, source })
    }

    /// Map the kernel sections at their link addresses.
    ///
    /// # Errors
    /// The first failing page, tagged with its section.
    pub fn map_kernel_image<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        image: &KernelImage,
    ) -> Result<(), BootstrapError> {
        let sections = [
            ("kernel text", &image.text, TEXT),
            ("kernel rodata", &image.rodata, RODATA),
            ("kernel data", &image.data, DATA),
        ];
        for (what, range, flags) in sections {
            let mut va = range.start.align_down::<Size4K>();
            let end = range.end.align_up::<Size4K>();
            while va < end {
                self.map_4k(alloc, what, va, image.phys_of(va), flags)?;
                va += Size4K::SIZE;
            }
            debug!("{what}: {} .. {} -> {}", range.start, end, image.phys_of(range.start));
        }
        Ok(())
    }

    /// Direct-map every usable region at `HHDM + phys`.
    ///
    /// 2 MiB leaves cover every fully contained, aligned 2 MiB chunk; the
    /// ragged edges get 4 KiB pages.
    ///
    /// # Errors
    /// The first failing page.
    pub fn map_direct<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        regions: &[MemoryRegion],
    ) -> Result<(), BootstrapError> {
        let (mut large, mut small) = (0usize, 0usize);
        for region in regions.iter().filter(|r| r.is_usable()) {
            let mut pa = align_up(region.base, Size4K::SIZE);
            let end = align_down(region.end().as_u64(), Size4K::SIZE);
            while pa < end {
                let phys = PhysicalAddress::new(pa);
                let va = self.hhdm(phys);
                if phys.is_aligned::<Size2M>()
                    && va.is_aligned::<Size2M>()
                    && end - pa >= Size2M::SIZE
                {
                    self.space
                        .map_large::<A, Size2M>(alloc, va, phys, DATA)
                        .map_err(|source| BootstrapError::Map {
                            what: "direct map",
                            va,
                            source,
                        })?;
                    pa += Size2M::SIZE;
                    large += 1;
                } else {
                    self.map_4k(alloc, "direct map", va, phys, DATA)?;
                    pa += Size4K::SIZE;
                    small += 1;
                }
            }
        }
        debug!("direct map: {large} x 2M, {small} x 4K");
        Ok(())
    }

    /// Alias `frame` at `HHDM + phys`, unless that alias already resolves to
    /// `frame`. Returns whether a new mapping was written.
    ///
    /// # Errors
    /// The failing mapping, tagged with `what`.
    pub fn map_hhdm_page<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        what: &'static str,
        frame: PhysicalPage<Size4K>,
        flags: PageFlags,
    ) -> Result<bool, BootstrapError> {
        let va = self.hhdm(frame.base());
        if self
            .space
            .translate(va)
            .is_some_and(|t| t.phys == frame.base())
        {
            return Ok(false);
        }
        self.map_4k(alloc, what, va, frame.base(), flags)?;
        Ok(true)
    }

    /// Alias the pages covering `range` into the direct map and return the
    /// alias of `range.base`.
    ///
    /// # Errors
    /// The first failing page.
    pub fn map_hhdm_range<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        what: &'static str,
        range: PhysRange,
        flags: PageFlags,
    ) -> Result<VirtualAddress, BootstrapError> {
        let start = range.base.align_down::<Size4K>().as_u64();
        let end = align_up(range.base.as_u64().saturating_add(range.len), Size4K::SIZE);
        let mut pa = start;
        while pa < end {
            let frame = PhysicalAddress::new(pa).page::<Size4K>();
            self.map_hhdm_page(alloc, what, frame, flags)?;
            pa += Size4K::SIZE;
        }
        Ok(self.hhdm(range.base))
    }

    /// Map a linear framebuffer into the direct map.
    ///
    /// Returns `None` for a framebuffer without linear memory.
    ///
    /// # Errors
    /// The first failing page.
    pub fn map_framebuffer<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        fb: &FramebufferInfo,
    ) -> Result<Option<VirtualAddress>, BootstrapError> {
        if !fb.is_linear() {
            debug!("no linear framebuffer to map");
            return Ok(None);
        }
        let range = PhysRange::new(fb.framebuffer_ptr, fb.framebuffer_size);
        let va = self.map_hhdm_range(alloc, "framebuffer", range, DATA)?;
        debug!("framebuffer at {va}");
        Ok(Some(va))
    }

    /// Map a device register window uncached into the direct map.
    ///
    /// # Errors
    /// The first failing page.
    pub fn map_mmio<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        range: PhysRange,
    ) -> Result<VirtualAddress, BootstrapError> {
        self.map_hhdm_range(alloc, "MMIO window", range, MMIO)
    }

    /// Map the IDT read-only into the direct map.
    ///
    /// # Errors
    /// The first failing page.
    pub fn map_idt<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        range: PhysRange,
    ) -> Result<VirtualAddress, BootstrapError> {
        self.map_hhdm_range(alloc, "IDT", range, RODATA)
    }

    /// Keep the allocator's own bookkeeping frames reachable through the
    /// direct map. Returns the number of new mappings.
    ///
    /// # Errors
    /// The first failing page.
    pub fn map_bookkeeping<A: FrameAlloc + BookkeepingFrames>(
        &mut self,
        alloc: &mut A,
    ) -> Result<usize, BootstrapError> {
        let mut mapped = 0;
        let mut cursor = alloc.first_bookkeeping_frame();
        while let Some(frame) = cursor {
            // Mapping may consume bookkeeping frames; step first.
            cursor = alloc.next_bookkeeping_frame(frame);
            if self.map_hhdm_page(alloc, "allocator bookkeeping", frame, DATA)? {
                mapped += 1;
            }
        }
        debug!("allocator bookkeeping: {mapped} frames aliased");
        Ok(mapped)
    }

    /// Map one page at an arbitrary address.
    ///
    /// # Errors
    /// The failing mapping, tagged with `what`.
    pub fn map_page_at<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        what: &'static str,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), BootstrapError> {
        self.map_4k(alloc, what, va.align_down::<Size4K>(), pa.align_down::<Size4K>(), flags)
    }

    /// Back `pages` stack pages with fresh zeroed frames, leaving the page at
    /// `base` unmapped as a guard. Returns the stack top.
    ///
    /// # Errors
    /// [`BootstrapError::OutOfMemory`] when frames run out, or the failing
    /// mapping.
    pub fn map_stack<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        base: VirtualAddress,
        pages: usize,
    ) -> Result<VirtualAddress, BootstrapError> {
        let mut va = base + Size4K::SIZE;
        for _ in 0..pages {
            let frame = alloc
                .alloc_4k()
                .ok_or(BootstrapError::OutOfMemory("kernel stack"))?;
            unsafe { zero_frame(self.space.mapper(), frame) };
            self.map_4k(alloc, "kernel stack", va, frame.base(), DATA)?;
            va += Size4K::SIZE;
        }
        debug!("kernel stack: guard at {base}, top at {va}");
        Ok(va)
    }

    /// Hand out the finished address space.
    #[must_use]
    pub fn finish(self) -> AddressSpace<'m, M, T> {
        self.space
    }
}

/// Build the complete kernel address space described by `plan`.
///
/// # Errors
/// The first failing step; nothing is activated.
pub fn build_kernel_space<'m, M, T, A>(
    plan: &BootstrapPlan<'_>,
    mapper: &'m M,
    alloc: &mut A,
    tlb: T,
) -> Result<KernelSpace, BootstrapError>
where
    M: PhysMapper,
    T: TlbInvalidate,
    A: FrameAlloc + BookkeepingFrames,
{
    let mut builder = KernelSpaceBuilder::new(mapper, alloc, tlb, plan.hhdm_base)?;
    builder.map_kernel_image(alloc, &plan.image)?;
    builder.map_direct(alloc, plan.regions)?;

    let framebuffer = match &plan.framebuffer {
        Some(fb) => builder.map_framebuffer(alloc, fb)?,
        None => None,
    };
    for window in plan.mmio {
        builder.map_mmio(alloc, *window)?;
    }
    if let Some(idt) = plan.idt {
        builder.map_idt(alloc, idt)?;
    }

    let stack_top = builder.map_stack(alloc, plan.stack_base, plan.stack_pages)?;
    if let Some((va, pa)) = plan.loader_stack {
        builder.map_page_at(alloc, "loader stack", va, pa, DATA)?;
    }

    // Last, so frames consumed by the steps above are already settled.
    builder.map_bookkeeping(alloc)?;

    let root = builder.finish().root();
    info!("kernel address space ready: PML4 {root}, stack top {stack_top}");
    Ok(KernelSpace {
        root,
        stack_top,
        framebuffer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BumpAlloc, RecordingTlb, TestPhys};
    use crate::{MappedSize, TableLevel};
    use kernel_info::boot::{BootPixelFormat, MemoryRegionKind};
    use kernel_info::memory::{HHDM_BASE, KERNEL_STACK_BASE, KERNEL_STACK_PAGES};

    const VIRT_BASE: u64 = 0xFFFF_FFFF_8010_0000;
    const PHYS_BASE: u64 = 0x10_0000;

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn frame(v: u64) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(pa(v))
    }

    fn image() -> KernelImage {
        KernelImage {
            virt_base: va(VIRT_BASE),
            phys_base: pa(PHYS_BASE),
            text: va(VIRT_BASE)..va(VIRT_BASE + 0x2000),
            rodata: va(VIRT_BASE + 0x2000)..va(VIRT_BASE + 0x3000),
            data: va(VIRT_BASE + 0x3000)..va(VIRT_BASE + 0x3800),
        }
    }

    fn regions() -> [MemoryRegion; 3] {
        [
            MemoryRegion::new(PHYS_BASE, 0x10_0000, MemoryRegionKind::KernelAndModules),
            MemoryRegion::usable(0x30_0000, 0x50_0000),
            MemoryRegion::new(0x80_0000, 0x10_0000, MemoryRegionKind::Reserved),
        ]
    }

    /// Bump allocation plus a fixed list of pretend bookkeeping frames.
    struct NodeAlloc {
        inner: BumpAlloc,
        nodes: Vec<PhysicalPage<Size4K>>,
    }

    impl FrameAlloc for NodeAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            self.inner.alloc_4k()
        }
    }

    impl BookkeepingFrames for NodeAlloc {
        fn first_bookkeeping_frame(&self) -> Option<PhysicalPage<Size4K>> {
            self.nodes.first().copied()
        }

        fn next_bookkeeping_frame(&self, frame: PhysicalPage<Size4K>) -> Option<PhysicalPage<Size4K>> {
            let i = self.nodes.iter().position(|n| *n == frame)?;
            self.nodes.get(i + 1).copied()
        }
    }

    fn node_alloc(nodes: &[u64]) -> NodeAlloc {
        NodeAlloc {
            inner: BumpAlloc::new(0x100_0000, 0x200_0000),
            nodes: nodes.iter().map(|&n| frame(n)).collect(),
        }
    }

    #[test]
    fn kernel_sections_get_their_permissions() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(0x100_0000, 0x200_0000);
        let mut b = KernelSpaceBuilder::new(&phys, &mut alloc, &tlb, HHDM_BASE).unwrap();
        b.map_kernel_image(&mut alloc, &image()).unwrap();

        let space = b.space();
        let text = space.translate(va(VIRT_BASE + 0x1010)).unwrap();
        assert_eq!(text.phys, pa(PHYS_BASE + 0x1010));
        assert_eq!(text.flags, PageFlags::PRESENT);

        let rodata = space.translate(va(VIRT_BASE + 0x2000)).unwrap();
        assert_eq!(rodata.phys, pa(PHYS_BASE + 0x2000));
        assert_eq!(rodata.flags, PageFlags::PRESENT | PageFlags::NO_EXECUTE);

        let data = space.translate(va(VIRT_BASE + 0x37FF)).unwrap();
        assert_eq!(data.phys, pa(PHYS_BASE + 0x37FF));
        assert_eq!(
            data.flags,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_EXECUTE
        );

        assert_eq!(space.translate(va(VIRT_BASE + 0x4000)), None);
    }

    #[test]
    fn direct_map_prefers_large_pages() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(0x100_0000, 0x200_0000);
        let mut b = KernelSpaceBuilder::new(&phys, &mut alloc, &tlb, HHDM_BASE).unwrap();
        b.map_direct(&mut alloc, &regions()).unwrap();

        let space = b.space();
        let edge = space.translate(va(HHDM_BASE + 0x30_0000)).unwrap();
        assert_eq!(edge.size, MappedSize::Page4K);
        assert_eq!(edge.phys, pa(0x30_0000));

        let chunk = space.translate(va(HHDM_BASE + 0x65_4321)).unwrap();
        assert_eq!(chunk.size, MappedSize::Page2M);
        assert_eq!(chunk.phys, pa(0x65_4321));
        assert!(!chunk.flags.contains(PageFlags::USER));

        // Non-usable regions stay out of the direct map.
        assert_eq!(space.translate(va(HHDM_BASE + PHYS_BASE)), None);
        assert_eq!(space.translate(va(HHDM_BASE + 0x80_0000)), None);
    }

    #[test]
    fn hhdm_aliases_already_covered_are_skipped() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(0x100_0000, 0x200_0000);
        let mut b = KernelSpaceBuilder::new(&phys, &mut alloc, &tlb, HHDM_BASE).unwrap();
        b.map_direct(&mut alloc, &regions()).unwrap();

        let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        assert!(!b.map_hhdm_page(&mut alloc, "test", frame(0x40_0000), flags).unwrap());
        assert!(b.map_hhdm_page(&mut alloc, "test", frame(0x90_0000), flags).unwrap());
        assert!(!b.map_hhdm_page(&mut alloc, "test", frame(0x90_0000), flags).unwrap());
        assert_eq!(
            b.space().translate(va(HHDM_BASE + 0x90_0008)).unwrap().phys,
            pa(0x90_0008)
        );
    }

    #[test]
    fn full_plan_builds_every_region() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = node_alloc(&[0x90_0000, 0x50_0000]);
        let regions = regions();
        let mmio = [PhysRange::new(0xFEE0_0000, 0x1000)];
        let plan = BootstrapPlan {
            hhdm_base: HHDM_BASE,
            image: image(),
            regions: &regions,
            framebuffer: Some(FramebufferInfo {
                framebuffer_ptr: 0xE000_0000,
                framebuffer_size: 0x3000,
                framebuffer_width: 32,
                framebuffer_height: 32,
                framebuffer_stride: 32,
                framebuffer_format: BootPixelFormat::Rgb,
            }),
            mmio: &mmio,
            idt: Some(PhysRange::new(PHYS_BASE + 0x3100, 0xFFF)),
            loader_stack: Some((va(0x7FF0_0F00), pa(0x7A00_0F00))),
            stack_base: va(KERNEL_STACK_BASE),
            stack_pages: KERNEL_STACK_PAGES,
        };

        let ks = build_kernel_space(&plan, &phys, &mut alloc, &tlb).unwrap();
        let space = unsafe { AddressSpace::from_root(&phys, ks.root, &tlb) };

        // Stack: guard page below, pages up to the top.
        let pages = KERNEL_STACK_PAGES as u64;
        assert_eq!(ks.stack_top, va(KERNEL_STACK_BASE + (pages + 1) * 4096));
        assert_eq!(space.translate(va(KERNEL_STACK_BASE)), None);
        assert!(space.translate(va(KERNEL_STACK_BASE + 4096)).is_some());
        let top = space.translate(va(ks.stack_top.as_u64() - 8)).unwrap();
        assert!(top.flags.writable() && top.flags.no_execute());
        assert_eq!(space.translate(ks.stack_top), None);

        assert_eq!(ks.framebuffer, Some(va(HHDM_BASE + 0xE000_0000)));
        assert!(space.translate(va(HHDM_BASE + 0xE000_2FFF)).is_some());

        let lapic = space.translate(va(HHDM_BASE + 0xFEE0_00B0)).unwrap();
        assert!(lapic.flags.cache_disable());

        let idt = space.translate(va(HHDM_BASE + PHYS_BASE + 0x3100)).unwrap();
        assert_eq!(idt.phys, pa(PHYS_BASE + 0x3100));
        assert!(!idt.flags.writable());

        let loader = space.translate(va(0x7FF0_0F00)).unwrap();
        assert_eq!(loader.phys, pa(0x7A00_0F00));

        // One node outside the direct map gets its own alias, the other is
        // already covered by a 2 MiB page.
        let node = space.translate(va(HHDM_BASE + 0x90_0000)).unwrap();
        assert_eq!((node.phys, node.size), (pa(0x90_0000), MappedSize::Page4K));
        let node = space.translate(va(HHDM_BASE + 0x50_0000)).unwrap();
        assert_eq!((node.phys, node.size), (pa(0x50_0000), MappedSize::Page2M));
    }

    #[test]
    fn failures_name_the_region() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = node_alloc(&[]);
        let regions = regions();
        let plan = BootstrapPlan {
            hhdm_base: HHDM_BASE,
            image: image(),
            regions: &regions,
            framebuffer: None,
            mmio: &[],
            idt: None,
            // Inside a 2 MiB direct-map page.
            loader_stack: Some((va(HHDM_BASE + 0x40_0F00), pa(0x40_0F00))),
            stack_base: va(KERNEL_STACK_BASE),
            stack_pages: 1,
        };

        assert_eq!(
            build_kernel_space(&plan, &phys, &mut alloc, &tlb),
            Err(BootstrapError::Map {
                what: "loader stack",
                va: va(HHDM_BASE + 0x40_0000),
                source: VmemError::PageSizeConflict {
                    va: va(HHDM_BASE + 0x40_0000),
                    level: TableLevel::Pd,
                },
            })
        );
    }

    #[test]
    fn stack_runs_out_of_frames() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        // Root, three tables and five frames in total for the stack pages.
        let mut alloc = BumpAlloc::new(0x100_0000, 0x100_0000 + 9 * 4096);
        let mut b = KernelSpaceBuilder::new(&phys, &mut alloc, &tlb, HHDM_BASE).unwrap();

        assert_eq!(
            b.map_stack(&mut alloc, va(KERNEL_STACK_BASE), KERNEL_STACK_PAGES),
            Err(BootstrapError::OutOfMemory("kernel stack"))
        );
    }
}
