//! Kernel image layout, as placed by `kernel.ld`.

use kernel_info::boot::KernelBootInfo;
use kernel_vmem::bootstrap::KernelImage;
use kernel_vmem::{PhysicalAddress, VirtualAddress};

unsafe extern "C" {
    static __kernel_start: u8;
    static __text_start: u8;
    static __text_end: u8;
    static __rodata_start: u8;
    static __rodata_end: u8;
    static __data_start: u8;
    static __bss_end: u8;
}

fn addr(sym: *const u8) -> VirtualAddress {
    VirtualAddress::from_ptr(sym)
}

/// Section ranges of the running image, backed by the physical load
/// address the loader reports.
pub fn kernel_image(bi: &KernelBootInfo) -> KernelImage {
    KernelImage {
        virt_base: addr(&raw const __kernel_start),
        phys_base: PhysicalAddress::new(bi.kernel_phys_base),
        text: addr(&raw const __text_start)..addr(&raw const __text_end),
        rodata: addr(&raw const __rodata_start)..addr(&raw const __rodata_end),
        data: addr(&raw const __data_start)..addr(&raw const __bss_end),
    }
}
