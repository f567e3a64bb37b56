//! Simulated physical memory for page-table and allocator tests.

use crate::{FrameAlloc, PhysMapper, TlbInvalidate};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use std::cell::RefCell;
use std::collections::BTreeMap;

#[repr(C, align(4096))]
struct Aligned4K([u8; 4096]);

/// Sparse "RAM": a frame is backed by a zeroed 4 KiB block on first touch.
#[derive(Default)]
pub struct TestPhys {
    frames: RefCell<BTreeMap<u64, Box<Aligned4K>>>,
}

impl TestPhys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn frame_ptr(&self, frame: u64) -> *mut u8 {
        let mut frames = self.frames.borrow_mut();
        let block = frames
            .entry(frame)
            .or_insert_with(|| Box::new(Aligned4K([0; 4096])));
        block.0.as_mut_ptr()
    }

    #[must_use]
    pub fn read_u64(&self, pa: u64) -> u64 {
        unsafe { *self.phys_to_mut::<u64>(PhysicalAddress::new(pa)) }
    }

    pub fn write_u64(&self, pa: u64, value: u64) {
        unsafe { *self.phys_to_mut::<u64>(PhysicalAddress::new(pa)) = value };
    }
}

impl PhysMapper for TestPhys {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let base = self.frame_ptr(pa.as_u64() & !0xFFF);
        let off = (pa.as_u64() & 0xFFF) as usize;
        assert!(off + size_of::<T>() <= 4096, "access crosses a frame");
        unsafe { &mut *base.add(off).cast::<T>() }
    }
}

/// Hands out consecutive frames from `[next, end)`.
pub struct BumpAlloc {
    pub next: u64,
    pub end: u64,
    pub handed_out: Vec<PhysicalPage<Size4K>>,
}

impl BumpAlloc {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            next: start,
            end,
            handed_out: Vec::new(),
        }
    }
}

impl FrameAlloc for BumpAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.next + 4096 > self.end {
            return None;
        }
        let page = PhysicalPage::containing(PhysicalAddress::new(self.next));
        self.next += 4096;
        self.handed_out.push(page);
        Some(page)
    }
}

/// Records every invalidated address.
#[derive(Default)]
pub struct RecordingTlb {
    pub invalidated: RefCell<Vec<VirtualAddress>>,
}

impl TlbInvalidate for RecordingTlb {
    fn invalidate_page(&self, va: VirtualAddress) {
        self.invalidated.borrow_mut().push(va);
    }
}

impl TlbInvalidate for &RecordingTlb {
    fn invalidate_page(&self, va: VirtualAddress) {
        (**self).invalidate_page(va);
    }
}
