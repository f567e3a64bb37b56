//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// Kernel function pointer.
///
/// # ABI
/// The loader calls the kernel with the System V calling convention; the
/// boot info pointer arrives in `RDI`.
pub type KernelEntryFn = extern "sysv64" fn(*const KernelBootInfo) -> !;

/// Information the kernel needs from the loader.
/// Keep this `#[repr(C)]` and prefer fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Clone)]
pub struct KernelBootInfo {
    /// Physical memory map.
    pub mmap: MemoryMapInfo,

    /// Physical address the kernel image was loaded at.
    pub kernel_phys_base: u64,

    /// Virtual address the kernel image was linked at.
    pub kernel_virt_base: u64,

    /// RSDP (ACPI 2.0+) physical address, or 0 if not provided.
    pub rsdp_addr: u64,

    /// Framebuffer information.
    pub fb: FramebufferInfo,
}

/// Location of the loader-provided memory map.
#[repr(C)]
#[derive(Clone)]
pub struct MemoryMapInfo {
    /// Address of the first [`MemoryRegion`], reachable in the loader's address space.
    pub regions_ptr: u64,

    /// Number of [`MemoryRegion`] entries.
    pub regions_len: u64,
}

/// A contiguous range of physical memory and what it is used for.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self { base, length, kind }
    }

    #[must_use]
    pub const fn usable(base: u64, length: u64) -> Self {
        Self::new(base, length, MemoryRegionKind::Usable)
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// One past the last byte, saturating.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.saturating_add(self.length))
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryRegionKind::Usable)
    }

    #[must_use]
    pub const fn contains(&self, pa: u64) -> bool {
        pa >= self.base && pa < self.base.saturating_add(self.length)
    }
}

/// Region type tag. Only [`Usable`](MemoryRegionKind::Usable) memory feeds
/// the frame allocator.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryRegionKind {
    Usable = 0,
    Reserved = 1,
    AcpiReclaimable = 2,
    AcpiNvs = 3,
    BadMemory = 4,
    LoaderReclaimable = 5,
    KernelAndModules = 6,
    Framebuffer = 7,
}

#[repr(C)]
#[derive(Clone, Debug)]
pub struct FramebufferInfo {
    /// Linear framebuffer base address (CPU physical address).
    pub framebuffer_ptr: u64,

    /// Total framebuffer size in **bytes**.
    pub framebuffer_size: u64,

    /// Visible width in **pixels**.
    pub framebuffer_width: u64,

    /// Visible height in **pixels**.
    pub framebuffer_height: u64,

    /// Pixels per scanline (a.k.a. stride). May be >= width due to padding.
    pub framebuffer_stride: u64,

    /// Pixel format tag. If `BltOnly`, there is no linear framebuffer to map.
    pub framebuffer_format: BootPixelFormat,
}

impl FramebufferInfo {
    /// Whether a linear framebuffer exists that should be mapped.
    #[must_use]
    pub const fn is_linear(&self) -> bool {
        !matches!(self.framebuffer_format, BootPixelFormat::BltOnly)
            && self.framebuffer_ptr != 0
            && self.framebuffer_size != 0
    }
}

/// Pixel format tag.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BootPixelFormat {
    Rgb = 0,
    Bgr = 1,
    Bitmask = 2,
    /// No linear framebuffer available.
    BltOnly = 3,
}
