//! # Address Space (x86-64, PML4-rooted)
//!
//! An [`AddressSpace`] is a PML4 root frame plus the means to reach table
//! frames ([`PhysMapper`]) and to drop stale translations
//! ([`TlbInvalidate`]). Frames for new tables are borrowed per call from a
//! [`FrameAlloc`](crate::FrameAlloc), so the same allocator can also be
//! queried between calls.
//!
//! - [`map`](AddressSpace::map) / [`map_large`](AddressSpace::map_large)
//!   install leaves, creating intermediate tables on demand.
//! - [`unmap`](AddressSpace::unmap) clears a leaf of whatever size covers
//!   the address. Intermediate tables are never reclaimed.
//! - [`translate`](AddressSpace::translate) resolves an address without
//!   side effects.
//!
//! Intermediate entries are created `PRESENT | WRITABLE | USER`; the leaf
//! alone decides the effective permissions.

mod map_size;

pub use map_size::{LargePageSize, MapSize};

use crate::page_table::{
    PageDirectory, PageDirectoryPointerTable, PageMapLevel4, PageTable, PdEntry, PdEntryKind,
    PdptEntry, PdptEntryKind, Pml4Entry, PtEntry, TableLevel,
};
use crate::{FrameAlloc, Invlpg, PageFlags, PhysMapper, TlbInvalidate, zero_frame};
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K, VirtualAddress,
};
use log::{error, trace};

/// Paging failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmemError {
    /// No frame was available for a new table at the given level.
    #[error("out of memory allocating a {0} table")]
    OutOfMemory(TableLevel),
    /// The walk met a leaf of a different size than requested.
    #[error("{va} conflicts with an existing mapping at the {level} level")]
    PageSizeConflict {
        va: VirtualAddress,
        level: TableLevel,
    },
    /// An address is not aligned to the requested page size.
    #[error("address {addr:#x} is not {size}-aligned")]
    Misaligned { addr: u64, size: &'static str },
}

/// Outcome of [`AddressSpace::unmap`], carrying the frame that was mapped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Unmapped {
    NotMapped,
    Page4K(PhysicalPage<Size4K>),
    Page2M(PhysicalPage<Size2M>),
    Page1G(PhysicalPage<Size1G>),
}

/// Size of the leaf that resolved a translation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MappedSize {
    Page4K,
    Page2M,
    Page1G,
}

/// A resolved virtual address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Physical address including the in-page offset.
    pub phys: PhysicalAddress,
    /// Flags of the leaf entry.
    pub flags: PageFlags,
    pub size: MappedSize,
}

/// A PML4-rooted address space.
pub struct AddressSpace<'m, M: PhysMapper, T: TlbInvalidate = Invlpg> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
    tlb: T,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M, Invlpg> {
    /// View the currently active address space (reads CR3).
    ///
    /// # Safety
    /// Must run in ring 0, and the active PML4 must be reachable through
    /// `mapper`.
    #[must_use]
    pub unsafe fn from_current(mapper: &'m M) -> Self {
        use kernel_registers::LoadRegisterUnsafe;
        let cr3 = unsafe { kernel_registers::cr3::Cr3::load_unsafe() };
        Self {
            root: cr3.pml4(),
            mapper,
            tlb: Invlpg,
        }
    }
}

impl<'m, M: PhysMapper, T: TlbInvalidate> AddressSpace<'m, M, T> {
    /// Allocate and zero a fresh PML4.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if `alloc` has no frame left.
    pub fn new<A: FrameAlloc>(mapper: &'m M, alloc: &mut A, tlb: T) -> Result<Self, VmemError> {
        let root = alloc
            .alloc_4k()
            .ok_or(VmemError::OutOfMemory(TableLevel::Pml4))?;
        unsafe { zero_frame(mapper, root) };
        Ok(Self { root, mapper, tlb })
    }

    /// Wrap an existing PML4.
    ///
    /// # Safety
    /// `root` must hold a valid PML4 reachable through `mapper`, and no other
    /// code may modify that hierarchy while this value is in use.
    #[must_use]
    pub const unsafe fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>, tlb: T) -> Self {
        Self { root, mapper, tlb }
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn tlb(&self) -> &T {
        &self.tlb
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Load this address space into CR3.
    ///
    /// # Safety
    /// The code, stack and data in use must be mapped in this address space.
    pub unsafe fn activate(&self) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { kernel_registers::cr3::Cr3::from_pml4(self.root).store_unsafe() };
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn pml4_mut(&self) -> &mut PageMapLevel4 {
        unsafe { self.mapper.phys_to_mut::<PageMapLevel4>(self.root.base()) }
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn pdpt_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageDirectoryPointerTable {
        unsafe { self.mapper.phys_to_mut::<PageDirectoryPointerTable>(page.base()) }
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn pd_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageDirectory {
        unsafe { self.mapper.phys_to_mut::<PageDirectory>(page.base()) }
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn pt_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(page.base()) }
    }

    fn alloc_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        level: TableLevel,
    ) -> Result<PhysicalPage<Size4K>, VmemError> {
        let frame = alloc.alloc_4k().ok_or(VmemError::OutOfMemory(level))?;
        unsafe { zero_frame(self.mapper, frame) };
        trace!("new {level} table at {frame}");
        Ok(frame)
    }

    /// The PDPT covering `va`, created if absent.
    pub(crate) fn ensure_pdpt<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, VmemError> {
        if let Some(pdpt) = self.pml4_mut().entry(va).next_table() {
            return Ok(pdpt);
        }
        let frame = self.alloc_table(alloc, TableLevel::Pdpt)?;
        self.pml4_mut()
            .set_entry(va, Pml4Entry::make_next(frame, PageFlags::TABLE));
        Ok(frame)
    }

    /// The PD covering `va`, created if absent.
    ///
    /// A 1 GiB leaf in the way is a [`VmemError::PageSizeConflict`].
    pub(crate) fn ensure_pd<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, VmemError> {
        let pdpt = self.ensure_pdpt(alloc, va)?;
        match self.pdpt_mut(pdpt).entry(va).kind() {
            Some(PdptEntryKind::NextPageDirectory(pd, _)) => return Ok(pd),
            Some(PdptEntryKind::Leaf1GiB(..)) => {
                return Err(VmemError::PageSizeConflict {
                    va,
                    level: TableLevel::Pdpt,
                });
            }
            None => {}
        }
        let frame = self.alloc_table(alloc, TableLevel::Pd)?;
        self.pdpt_mut(pdpt)
            .set_entry(va, PdptEntry::make_next(frame, PageFlags::TABLE));
        Ok(frame)
    }

    /// The PT covering `va`, created if absent.
    ///
    /// A 2 MiB or 1 GiB leaf in the way is a [`VmemError::PageSizeConflict`].
    pub(crate) fn ensure_pt<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage<Size4K>, VmemError> {
        let pd = self.ensure_pd(alloc, va)?;
        match self.pd_mut(pd).entry(va).kind() {
            Some(PdEntryKind::NextPageTable(pt, _)) => return Ok(pt),
            Some(PdEntryKind::Leaf2MiB(..)) => {
                return Err(VmemError::PageSizeConflict {
                    va,
                    level: TableLevel::Pd,
                });
            }
            None => {}
        }
        let frame = self.alloc_table(alloc, TableLevel::Pt)?;
        self.pd_mut(pd)
            .set_entry(va, PdEntry::make_next(frame, PageFlags::TABLE));
        Ok(frame)
    }

    /// Map the 4 KiB page at `va` to the frame at `pa`.
    ///
    /// The leaf is `pa | flags` with `PS` clear. An existing 4 KiB leaf is
    /// replaced. The TLB entry for `va` is invalidated.
    ///
    /// # Errors
    /// - [`VmemError::Misaligned`] if `va` or `pa` is not 4 KiB aligned.
    /// - [`VmemError::OutOfMemory`] if an intermediate table cannot be allocated.
    /// - [`VmemError::PageSizeConflict`] if a large page already covers `va`.
    pub fn map<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        self.map_page::<A, Size4K>(alloc, va, pa, flags)
    }

    /// Map a 2 MiB or 1 GiB page at `va` to `pa` with `PS` set.
    ///
    /// An existing leaf of the same size is overwritten in place.
    ///
    /// # Errors
    /// As [`map`](Self::map); additionally a lower-level table already
    /// present in the slot is a [`VmemError::PageSizeConflict`].
    pub fn map_large<A: FrameAlloc, S: LargePageSize>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        self.map_page::<A, S>(alloc, va, pa, flags)
    }

    /// Map one page of size `S`.
    ///
    /// # Errors
    /// See [`map`](Self::map) and [`map_large`](Self::map_large).
    pub fn map_page<A: FrameAlloc, S: MapSize>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        let misaligned = if va.is_aligned::<S>() {
            (!pa.is_aligned::<S>()).then_some(pa.as_u64())
        } else {
            Some(va.as_u64())
        };
        if let Some(addr) = misaligned {
            error!("refusing to map {va} -> {pa}: {addr:#x} is not {}-aligned", S::NAME);
            return Err(VmemError::Misaligned {
                addr,
                size: S::NAME,
            });
        }

        S::install(self, alloc, va, pa, flags)?;
        self.tlb.invalidate_page(va);
        trace!(
            "mapped {va} -> {pa} ({}, flags {:#x})",
            S::NAME,
            flags.into_bits()
        );
        Ok(())
    }

    /// Map `len` bytes starting at `va` to `pa` with 4 KiB pages.
    ///
    /// Both addresses must be 4 KiB aligned; `len` is rounded up.
    ///
    /// # Errors
    /// The first failing [`map`](Self::map).
    pub fn map_range<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        let mut off = 0;
        while off < len {
            self.map(alloc, va + off, pa + off, flags)?;
            off += Size4K::SIZE;
        }
        Ok(())
    }

    /// Remove the mapping that covers `va`.
    ///
    /// A large leaf is removed wholesale. Unmapping an absent address is a
    /// no-op returning [`Unmapped::NotMapped`].
    pub fn unmap(&mut self, va: VirtualAddress) -> Unmapped {
        let Some(pdpt) = self.pml4_mut().entry(va).next_table() else {
            return Unmapped::NotMapped;
        };

        let pdpt_table = self.pdpt_mut(pdpt);
        let pd = match pdpt_table.entry(va).kind() {
            None => return Unmapped::NotMapped,
            Some(PdptEntryKind::Leaf1GiB(page, _)) => {
                pdpt_table.set_entry(va, PdptEntry::zero());
                self.tlb.invalidate_page(va.align_down::<Size1G>());
                trace!("unmapped 1G page at {}", va.align_down::<Size1G>());
                return Unmapped::Page1G(page);
            }
            Some(PdptEntryKind::NextPageDirectory(pd, _)) => pd,
        };

        let pd_table = self.pd_mut(pd);
        let pt = match pd_table.entry(va).kind() {
            None => return Unmapped::NotMapped,
            Some(PdEntryKind::Leaf2MiB(page, _)) => {
                pd_table.set_entry(va, PdEntry::zero());
                self.tlb.invalidate_page(va.align_down::<Size2M>());
                trace!("unmapped 2M page at {}", va.align_down::<Size2M>());
                return Unmapped::Page2M(page);
            }
            Some(PdEntryKind::NextPageTable(pt, _)) => pt,
        };

        let pt_table = self.pt_mut(pt);
        let Some((page, _)) = pt_table.entry(va).page_4k() else {
            return Unmapped::NotMapped;
        };
        pt_table.set_entry(va, PtEntry::zero());
        self.tlb.invalidate_page(va.align_down::<Size4K>());
        trace!("unmapped 4K page at {}", va.align_down::<Size4K>());
        Unmapped::Page4K(page)
    }

    /// Resolve `va` through the page tables.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<Translation> {
        let pdpt = self.pml4_mut().entry(va).next_table()?;
        let pd = match self.pdpt_mut(pdpt).entry(va).kind()? {
            PdptEntryKind::Leaf1GiB(page, flags) => {
                return Some(Translation {
                    phys: page.join(va.offset::<Size1G>()),
                    flags,
                    size: MappedSize::Page1G,
                });
            }
            PdptEntryKind::NextPageDirectory(pd, _) => pd,
        };
        let pt = match self.pd_mut(pd).entry(va).kind()? {
            PdEntryKind::Leaf2MiB(page, flags) => {
                return Some(Translation {
                    phys: page.join(va.offset::<Size2M>()),
                    flags,
                    size: MappedSize::Page2M,
                });
            }
            PdEntryKind::NextPageTable(pt, _) => pt,
        };
        let (page, flags) = self.pt_mut(pt).entry(va).page_4k()?;
        Some(Translation {
            phys: page.join(va.offset::<Size4K>()),
            flags,
            size: MappedSize::Page4K,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::{L4Index, PdEntry};
    use crate::test_support::{BumpAlloc, RecordingTlb, TestPhys};

    const RW_NX: PageFlags = PageFlags::new()
        .with_present(true)
        .with_writable(true)
        .with_no_execute(true);

    const POOL_START: u64 = 0x100_0000;
    const POOL_END: u64 = 0x200_0000;

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    #[test]
    fn neighbouring_pages_share_intermediate_tables() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();
        let rw = PageFlags::PRESENT | PageFlags::WRITABLE;

        space.map(&mut alloc, va(0x1000_0000), pa(0x20_0000), rw).unwrap();
        space.map(&mut alloc, va(0x1000_1000), pa(0x20_1000), rw).unwrap();

        // Root plus one PDPT, one PD and one PT.
        assert_eq!(alloc.handed_out.len(), 4);

        let t = space.translate(va(0x1000_0123)).unwrap();
        assert_eq!(t.phys, pa(0x20_0123));
        assert_eq!(t.size, MappedSize::Page4K);
        assert_eq!(t.flags, rw);

        space.unmap(va(0x1000_0000));
        assert_eq!(space.translate(va(0x1000_0000)), None);
        assert_eq!(space.translate(va(0x1000_1000)).unwrap().phys, pa(0x20_1000));
    }

    #[test]
    fn leaf_is_address_or_flags_and_tables_are_permissive() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space.map(&mut alloc, va(0x40_0000), pa(0x20_0000), RW_NX).unwrap();

        let root = space.root().as_u64();
        let pml4e = phys.read_u64(root);
        assert_eq!(pml4e & 0x7, 0x7, "intermediate entries are P|W|U");
        let pdpt = pml4e & crate::page_table::ADDR_MASK_4K;
        let pd = phys.read_u64(pdpt) & crate::page_table::ADDR_MASK_4K;
        let pt = phys.read_u64(pd + 2 * 8) & crate::page_table::ADDR_MASK_4K;
        assert_eq!(phys.read_u64(pt), 0x20_0000 | RW_NX.into_bits());
    }

    #[test]
    fn mapping_again_replaces_the_leaf() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space.map(&mut alloc, va(0x40_0000), pa(0x20_0000), RW_NX).unwrap();
        space
            .map(&mut alloc, va(0x40_0000), pa(0x30_0000), PageFlags::PRESENT)
            .unwrap();

        let t = space.translate(va(0x40_0000)).unwrap();
        assert_eq!(t.phys, pa(0x30_0000));
        assert_eq!(t.flags, PageFlags::PRESENT);
        assert_eq!(alloc.handed_out.len(), 4);
    }

    #[test]
    fn unmap_is_idempotent_and_keeps_tables() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space.map(&mut alloc, va(0x40_0000), pa(0x20_0000), RW_NX).unwrap();
        space.map(&mut alloc, va(0x40_1000), pa(0x20_1000), RW_NX).unwrap();

        assert_eq!(
            space.unmap(va(0x40_0000)),
            Unmapped::Page4K(pa(0x20_0000).page())
        );
        assert_eq!(space.translate(va(0x40_0000)), None);
        assert_eq!(space.unmap(va(0x40_0000)), Unmapped::NotMapped);

        // The neighbour still resolves through the same tables.
        assert_eq!(space.translate(va(0x40_1000)).unwrap().phys, pa(0x20_1000));
        assert_eq!(alloc.handed_out.len(), 4);
    }

    #[test]
    fn unmapping_an_absent_address_touches_nothing() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        assert_eq!(space.unmap(va(0xFFFF_8000_0000_0000)), Unmapped::NotMapped);
        assert!(tlb.invalidated.borrow().is_empty());
        assert_eq!(alloc.handed_out.len(), 1);
    }

    #[test]
    fn every_change_invalidates_the_page() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space.map(&mut alloc, va(0x40_0000), pa(0x20_0000), RW_NX).unwrap();
        space
            .map_large::<_, Size2M>(&mut alloc, va(0x80_0000), pa(0x60_0000), RW_NX)
            .unwrap();
        space.unmap(va(0x40_0000));
        space.unmap(va(0x80_1234));

        assert_eq!(
            *tlb.invalidated.borrow(),
            vec![va(0x40_0000), va(0x80_0000), va(0x40_0000), va(0x80_0000)]
        );
    }

    #[test]
    fn large_pages_translate_with_offset_and_unmap_wholesale() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space
            .map_large::<_, Size2M>(&mut alloc, va(0x80_0000), pa(0x60_0000), RW_NX)
            .unwrap();
        space
            .map_large::<_, Size1G>(&mut alloc, va(0x8000_0000), pa(0x4000_0000), RW_NX)
            .unwrap();

        let t = space.translate(va(0x80_1234)).unwrap();
        assert_eq!(t.phys, pa(0x60_1234));
        assert_eq!(t.size, MappedSize::Page2M);
        assert!(t.flags.page_size());

        let t = space.translate(va(0x8123_4567)).unwrap();
        assert_eq!(t.phys, pa(0x4123_4567));
        assert_eq!(t.size, MappedSize::Page1G);

        assert_eq!(
            space.unmap(va(0x8123_4567)),
            Unmapped::Page1G(pa(0x4000_0000).page())
        );
        assert_eq!(space.translate(va(0x8000_0000)), None);
        assert_eq!(
            space.unmap(va(0x80_0000)),
            Unmapped::Page2M(pa(0x60_0000).page())
        );
    }

    #[test]
    fn small_page_under_a_large_leaf_conflicts() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space
            .map_large::<_, Size2M>(&mut alloc, va(0x80_0000), pa(0x60_0000), RW_NX)
            .unwrap();
        assert_eq!(
            space.map(&mut alloc, va(0x80_1000), pa(0x1000), RW_NX),
            Err(VmemError::PageSizeConflict {
                va: va(0x80_1000),
                level: TableLevel::Pd
            })
        );

        space
            .map_large::<_, Size1G>(&mut alloc, va(0x4000_0000), pa(0x4000_0000), RW_NX)
            .unwrap();
        assert_eq!(
            space.map(&mut alloc, va(0x4000_1000), pa(0x1000), RW_NX),
            Err(VmemError::PageSizeConflict {
                va: va(0x4000_1000),
                level: TableLevel::Pdpt
            })
        );

        // The large mappings are untouched.
        assert_eq!(space.translate(va(0x80_1000)).unwrap().phys, pa(0x60_1000));
    }

    #[test]
    fn large_page_over_an_existing_table_conflicts() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space.map(&mut alloc, va(0x40_0000), pa(0x20_0000), RW_NX).unwrap();
        assert_eq!(
            space.map_large::<_, Size2M>(&mut alloc, va(0x40_0000), pa(0x60_0000), RW_NX),
            Err(VmemError::PageSizeConflict {
                va: va(0x40_0000),
                level: TableLevel::Pd
            })
        );
        assert_eq!(
            space.map_large::<_, Size1G>(&mut alloc, va(0), pa(0), RW_NX),
            Err(VmemError::PageSizeConflict {
                va: va(0),
                level: TableLevel::Pdpt
            })
        );
        assert_eq!(space.translate(va(0x40_0000)).unwrap().phys, pa(0x20_0000));
    }

    #[test]
    fn misaligned_requests_are_rejected_before_allocating() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        assert_eq!(
            space.map(&mut alloc, va(0x40_0800), pa(0x20_0000), RW_NX),
            Err(VmemError::Misaligned {
                addr: 0x40_0800,
                size: "4K"
            })
        );
        assert_eq!(
            space.map_large::<_, Size2M>(&mut alloc, va(0x80_0000), pa(0x60_1000), RW_NX),
            Err(VmemError::Misaligned {
                addr: 0x60_1000,
                size: "2M"
            })
        );
        assert_eq!(alloc.handed_out.len(), 1);
        assert!(tlb.invalidated.borrow().is_empty());
    }

    #[test]
    fn exhausted_allocator_reports_the_level() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_START + 3 * 4096);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        assert_eq!(
            space.map(&mut alloc, va(0x40_0000), pa(0x20_0000), RW_NX),
            Err(VmemError::OutOfMemory(TableLevel::Pt))
        );
        assert_eq!(space.translate(va(0x40_0000)), None);
    }

    #[test]
    fn non_present_garbage_is_ignored() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        let slot = L4Index::from(va(0x40_0000)).as_usize() as u64;
        phys.write_u64(space.root().as_u64() + slot * 8, 0xDEAD_B000);
        assert_eq!(space.translate(va(0x40_0000)), None);
        assert_eq!(space.unmap(va(0x40_0000)), Unmapped::NotMapped);

        space.map(&mut alloc, va(0x40_0000), pa(0x20_0000), RW_NX).unwrap();
        assert_eq!(space.translate(va(0x40_0000)).unwrap().phys, pa(0x20_0000));
    }

    #[test]
    fn cleared_large_slot_can_hold_a_table_again() {
        let phys = TestPhys::new();
        let tlb = RecordingTlb::default();
        let mut alloc = BumpAlloc::new(POOL_START, POOL_END);
        let mut space = AddressSpace::new(&phys, &mut alloc, &tlb).unwrap();

        space
            .map_large::<_, Size2M>(&mut alloc, va(0x80_0000), pa(0x60_0000), RW_NX)
            .unwrap();
        space.unmap(va(0x80_0000));
        space.map(&mut alloc, va(0x80_0000), pa(0x1000), RW_NX).unwrap();

        let pdpt = space.pml4_mut().entry(va(0x80_0000)).next_table().unwrap();
        let pd = match space.pdpt_mut(pdpt).entry(va(0x80_0000)).kind() {
            Some(PdptEntryKind::NextPageDirectory(pd, _)) => pd,
            other => panic!("unexpected {other:?}"),
        };
        assert_ne!(space.pd_mut(pd).entry(va(0x80_0000)), PdEntry::zero());
        assert_eq!(space.translate(va(0x80_0000)).unwrap().size, MappedSize::Page4K);
    }
}
