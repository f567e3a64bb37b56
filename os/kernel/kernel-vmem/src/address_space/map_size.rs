//! # Page-size–directed leaf installation
//!
//! [`MapSize`] decides at the type level where the walk stops and which
//! entry becomes the leaf, so [`AddressSpace::map_page`] has no runtime
//! branching on the page size.

use super::{AddressSpace, VmemError};
use crate::page_table::{PdEntry, PdEntryKind, PdptEntry, PdptEntryKind, PtEntry, TableLevel};
use crate::{FrameAlloc, PageFlags, PhysMapper, TlbInvalidate};
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size1G, Size2M, Size4K, VirtualAddress};

/// A page size that [`AddressSpace`] can map.
pub trait MapSize: PageSize {
    /// The table level that holds the leaf.
    const LEAF_LEVEL: TableLevel;

    /// Ensure the chain above the leaf exists and write the leaf.
    ///
    /// `va` and `pa` are already `Self`-aligned. TLB maintenance is the
    /// caller's job.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] or [`VmemError::PageSizeConflict`].
    fn install<M: PhysMapper, T: TlbInvalidate, A: FrameAlloc>(
        space: &AddressSpace<'_, M, T>,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError>;
}

/// The sizes mapped by a `PS=1` entry.
pub trait LargePageSize: MapSize {}

impl LargePageSize for Size2M {}
impl LargePageSize for Size1G {}

impl MapSize for Size4K {
    const LEAF_LEVEL: TableLevel = TableLevel::Pt;

    fn install<M: PhysMapper, T: TlbInvalidate, A: FrameAlloc>(
        space: &AddressSpace<'_, M, T>,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        let pt = space.ensure_pt(alloc, va)?;
        space
            .pt_mut(pt)
            .set_entry(va, PtEntry::make_4k(pa.page(), flags));
        Ok(())
    }
}

impl MapSize for Size2M {
    const LEAF_LEVEL: TableLevel = TableLevel::Pd;

    fn install<M: PhysMapper, T: TlbInvalidate, A: FrameAlloc>(
        space: &AddressSpace<'_, M, T>,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        let pd = space.ensure_pd(alloc, va)?;
        let table = space.pd_mut(pd);
        if let Some(PdEntryKind::NextPageTable(..)) = table.entry(va).kind() {
            return Err(VmemError::PageSizeConflict {
                va,
                level: Self::LEAF_LEVEL,
            });
        }
        table.set_entry(va, PdEntry::make_2m(pa.page(), flags));
        Ok(())
    }
}

impl MapSize for Size1G {
    const LEAF_LEVEL: TableLevel = TableLevel::Pdpt;

    fn install<M: PhysMapper, T: TlbInvalidate, A: FrameAlloc>(
        space: &AddressSpace<'_, M, T>,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmemError> {
        let pdpt = space.ensure_pdpt(alloc, va)?;
        let table = space.pdpt_mut(pdpt);
        if let Some(PdptEntryKind::NextPageDirectory(..)) = table.entry(va).kind() {
            return Err(VmemError::PageSizeConflict {
                va,
                level: Self::LEAF_LEVEL,
            });
        }
        table.set_entry(va, PdptEntry::make_1g(pa.page(), flags));
        Ok(())
    }
}
