//! # Self-hosted Free-Frame Stack
//!
//! Free frames are recorded in *nodes*: 4 KiB frames holding a link to the
//! next node and 511 frame addresses. Nodes form a singly linked chain from
//! the head (the node being filled) down to the first node (`next == 0`).
//!
//! - [`free`](FrameStack::free) pushes onto the head node. When the head is
//!   full, a spare node becomes the new head; without a spare, the freed
//!   frame itself becomes the new head.
//! - [`allocate`](FrameStack::allocate) pops from the head node. When the head
//!   is empty and is not the first node, its successor (which is full)
//!   becomes the head and the emptied node is kept as a spare.
//!
//! Spares are linked through their `next` word like the chain itself. Node
//! and spare frames are never handed out, so the free count is exactly the
//! number of recorded entries. Physical frame 0 is never recorded, since 0
//! marks the end of a chain.
//!
//! Freeing a frame that is still mapped, or that is already free, is not
//! detected; callers own that contract.

use kernel_info::boot::MemoryRegion;
use kernel_info::memory::FIRST_NODE_HINT;
use kernel_vmem::{
    BookkeepingFrames, FrameAlloc, PageSize, PhysMapper, PhysicalAddress, PhysicalPage, Size4K,
    align_down, align_up, zero_frame,
};
use log::{debug, error, info, trace, warn};

/// Frame addresses stored per node; the remaining word is the link.
pub const ENTRIES_PER_NODE: usize = 511;

const FRAME: u64 = Size4K::SIZE;

/// Layout of a bookkeeping frame.
#[repr(C, align(4096))]
struct StackNode {
    /// Physical address of the next (older, full) node; 0 ends the chain.
    next: u64,
    entries: [u64; ENTRIES_PER_NODE],
}

const _: () = assert!(size_of::<StackNode>() == 4096);

/// Frame allocator failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PmmError {
    #[error("no free physical frames left")]
    OutOfMemory,
    #[error("{0} is not 4 KiB aligned")]
    Unaligned(PhysicalAddress),
    #[error("{0} holds free-stack bookkeeping")]
    StructuralFrame(PhysicalAddress),
    #[error("physical frame 0 cannot be tracked")]
    NullFrame,
    #[error("the memory map has no usable frame")]
    NoUsableMemory,
}

/// The physical memory manager.
pub struct FrameStack<'m, M: PhysMapper> {
    mapper: &'m M,
    head: PhysicalPage<Size4K>,
    /// Occupied entries in the head node.
    top: usize,
    first: PhysicalPage<Size4K>,
    /// Most recently retired node; its `next` links the older spares.
    spare: Option<PhysicalPage<Size4K>>,
    /// Bookkeeping frames, spares included.
    nodes: usize,
    /// Recorded entries over all nodes.
    free: u64,
}

impl<'m, M: PhysMapper> FrameStack<'m, M> {
    /// Build the stack from a firmware memory map.
    ///
    /// The first node is placed by [`pick_first_node`](Self::pick_first_node)
    /// and every other usable frame is pushed.
    ///
    /// # Errors
    /// [`PmmError::NoUsableMemory`] if no usable frame exists.
    ///
    /// # Safety
    /// Usable regions must really be unused RAM reachable through `mapper`,
    /// and nothing else may own them afterwards.
    pub unsafe fn init(mapper: &'m M, regions: &[MemoryRegion]) -> Result<Self, PmmError> {
        let Some(first) = Self::pick_first_node(regions) else {
            error!("memory map has no usable frame");
            return Err(PmmError::NoUsableMemory);
        };

        let mut stack = unsafe { Self::with_first_node(mapper, first) };
        for region in regions.iter().filter(|r| r.is_usable()) {
            let added = stack.add_region(region.base, region.length);
            debug!(
                "usable {:#x}..{:#x}: {added} frames",
                region.base,
                region.end().as_u64()
            );
        }

        info!(
            "physical memory: {} free frames ({} KiB) in {} nodes, first node at {first}",
            stack.free,
            stack.free * 4,
            stack.nodes
        );
        Ok(stack)
    }

    /// Start an empty stack whose first node is `first`.
    ///
    /// `first` may lie outside any usable region.
    ///
    /// # Safety
    /// `first` must be RAM reachable through `mapper` that nothing else uses.
    pub unsafe fn with_first_node(mapper: &'m M, first: PhysicalPage<Size4K>) -> Self {
        unsafe { zero_frame(mapper, first) };
        Self {
            mapper,
            head: first,
            top: 0,
            first,
            spare: None,
            nodes: 1,
            free: 0,
        }
    }

    /// Choose the first node's frame.
    ///
    /// Preference order: the frame at `FIRST_NODE_HINT` when a usable region
    /// contains it, then the lowest usable frame above the hint, then the
    /// lowest usable frame overall. Frame 0 is never chosen.
    #[must_use]
    pub fn pick_first_node(regions: &[MemoryRegion]) -> Option<PhysicalPage<Size4K>> {
        let spans = || {
            regions
                .iter()
                .filter(|r| r.is_usable())
                .map(|r| usable_span(r.base, r.length))
        };

        let contains_hint = spans()
            .any(|(start, end)| start <= FIRST_NODE_HINT && FIRST_NODE_HINT + FRAME <= end);
        let pick = if contains_hint {
            Some(FIRST_NODE_HINT)
        } else {
            spans()
                .filter_map(|(start, end)| {
                    let candidate = start.max(FIRST_NODE_HINT);
                    (candidate + FRAME <= end).then_some(candidate)
                })
                .min()
                .or_else(|| {
                    spans()
                        .filter(|(start, end)| start + FRAME <= *end)
                        .map(|(start, _)| start)
                        .min()
                })
        };
        pick.map(|pa| PhysicalPage::containing(PhysicalAddress::new(pa)))
    }

    /// Take over every whole frame of `[base, base + len)` except frame 0 and
    /// the first node. Returns the number of frames taken over; some of them
    /// may have become nodes rather than free entries.
    pub fn add_region(&mut self, base: u64, len: u64) -> u64 {
        let (start, end) = usable_span(base, len);
        let mut added = 0;
        let mut pa = start;
        while pa < end {
            let frame = PhysicalPage::containing(PhysicalAddress::new(pa));
            if frame != self.first {
                self.push(frame);
                added += 1;
            }
            pa += FRAME;
        }
        added
    }

    #[allow(clippy::mut_from_ref)]
    fn node(&self, frame: PhysicalPage<Size4K>) -> &mut StackNode {
        unsafe { self.mapper.phys_to_mut::<StackNode>(frame.base()) }
    }

    fn push(&mut self, frame: PhysicalPage<Size4K>) {
        if self.top == ENTRIES_PER_NODE {
            let Some(spare) = self.spare else {
                self.nodes += 1;
                self.grow(frame);
                trace!("free stack grew a node at {frame}");
                return;
            };
            self.spare = self.next_link(spare);
            self.grow(spare);
            trace!("free stack reused spare node {spare}");
        }

        let top = self.top;
        self.node(self.head).entries[top] = frame.as_u64();
        self.top += 1;
        self.free += 1;
    }

    /// Make `node` the new, empty head.
    fn grow(&mut self, node: PhysicalPage<Size4K>) {
        unsafe { zero_frame(self.mapper, node) };
        self.node(node).next = self.head.as_u64();
        self.head = node;
        self.top = 0;
    }

    /// Take a free frame.
    ///
    /// # Errors
    /// [`PmmError::OutOfMemory`] when no entry is left in any node.
    pub fn allocate(&mut self) -> Result<PhysicalPage<Size4K>, PmmError> {
        if self.top == 0 {
            let Some(next) = self.next_link(self.head) else {
                warn!("out of physical frames");
                return Err(PmmError::OutOfMemory);
            };

            // The successor is full; the emptied head waits as a spare.
            let retired = self.head;
            self.node(retired).next = self.spare.map_or(0, PhysicalPage::as_u64);
            self.spare = Some(retired);
            self.head = next;
            self.top = ENTRIES_PER_NODE;
            trace!("free stack retired node {retired}");
        }

        self.top -= 1;
        let top = self.top;
        let raw = self.node(self.head).entries[top];
        self.free -= 1;
        Ok(PhysicalPage::containing(PhysicalAddress::new(raw)))
    }

    /// Return the frame at `pa`.
    ///
    /// Checking `pa` against the bookkeeping frames walks every node and
    /// spare, so a free costs O(nodes); a node covers 511 frames, which
    /// keeps that walk short.
    ///
    /// # Errors
    /// - [`PmmError::Unaligned`] if `pa` is not 4 KiB aligned.
    /// - [`PmmError::NullFrame`] for physical frame 0.
    /// - [`PmmError::StructuralFrame`] if `pa` is one of the stack's nodes or
    ///   spares.
    ///
    /// The stack is unchanged on error.
    pub fn free(&mut self, pa: PhysicalAddress) -> Result<(), PmmError> {
        let Some(frame) = PhysicalPage::<Size4K>::from_aligned(pa) else {
            error!("refusing to free unaligned address {pa}");
            return Err(PmmError::Unaligned(pa));
        };
        if frame.as_u64() == 0 {
            warn!("refusing to free physical frame 0");
            return Err(PmmError::NullFrame);
        }
        if self.is_node(frame) {
            warn!("refusing to free {pa}: it is a free-stack node");
            return Err(PmmError::StructuralFrame(pa));
        }
        self.push(frame);
        Ok(())
    }

    fn is_node(&self, frame: PhysicalPage<Size4K>) -> bool {
        self.node_frames().any(|n| n == frame)
    }

    /// Frames `allocate` can still return: the recorded entries of all nodes.
    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free
    }

    /// Bookkeeping frames, spares included.
    #[inline]
    #[must_use]
    pub const fn node_count(&self) -> usize {
        self.nodes
    }

    #[inline]
    #[must_use]
    pub const fn first_node(&self) -> PhysicalPage<Size4K> {
        self.first
    }

    /// The bookkeeping frames: the chain from the head down to the first
    /// node, then the spares.
    #[must_use]
    pub fn node_frames(&self) -> NodeFrames<'_, 'm, M> {
        NodeFrames {
            stack: self,
            cursor: Some(self.head),
        }
    }

    /// The bookkeeping frame after `node`; the first node is followed by
    /// the spares.
    ///
    /// `node` must currently be a node or a spare.
    #[must_use]
    pub fn next_node(&self, node: PhysicalPage<Size4K>) -> Option<PhysicalPage<Size4K>> {
        if node == self.first {
            self.spare
        } else {
            self.next_link(node)
        }
    }

    fn next_link(&self, node: PhysicalPage<Size4K>) -> Option<PhysicalPage<Size4K>> {
        match self.node(node).next {
            0 => None,
            next => Some(PhysicalPage::containing(PhysicalAddress::new(next))),
        }
    }
}

/// Iterator over a [`FrameStack`]'s nodes.
pub struct NodeFrames<'s, 'm, M: PhysMapper> {
    stack: &'s FrameStack<'m, M>,
    cursor: Option<PhysicalPage<Size4K>>,
}

impl<M: PhysMapper> Iterator for NodeFrames<'_, '_, M> {
    type Item = PhysicalPage<Size4K>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        self.cursor = self.stack.next_node(node);
        Some(node)
    }
}

impl<M: PhysMapper> FrameAlloc for FrameStack<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.allocate().ok()
    }
}

impl<M: PhysMapper> BookkeepingFrames for FrameStack<'_, M> {
    fn first_bookkeeping_frame(&self) -> Option<PhysicalPage<Size4K>> {
        Some(self.head)
    }

    fn next_bookkeeping_frame(&self, frame: PhysicalPage<Size4K>) -> Option<PhysicalPage<Size4K>> {
        self.next_node(frame)
    }
}

/// Whole frames of `[base, base + len)` as `[start, end)`, skipping frame 0.
fn usable_span(base: u64, len: u64) -> (u64, u64) {
    let start = align_up(base, FRAME).max(FRAME);
    let end = align_down(base.saturating_add(len), FRAME);
    (start, end.max(start))
}
