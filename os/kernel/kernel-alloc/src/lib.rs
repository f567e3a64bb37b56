//! # Kernel Physical Memory Allocation
//!
//! The physical memory manager hands out 4 KiB frames from a LIFO stack
//! whose storage lives inside the free frames themselves, so it needs no
//! memory beyond what it manages.
//!
//! ```text
//!  head                                            first node
//!   │                                                  │
//!   ▼                                                  ▼
//! ┌────────────────┐  next  ┌────────────────┐  next  ┌────────────────┐
//! │ entries[..top] │ ─────► │ entries (full) │ ─────► │ entries (full) │ ─► 0
//! └────────────────┘        └────────────────┘        └────────────────┘
//! ```
//!
//! Nodes emptied by allocation are kept as spares for the next time the head
//! fills up, so the free count always equals the recorded entries.
//!
//! - [`frame_stack`]: the allocator.
//! - [`phys_mapper`]: the [`PhysMapper`](kernel_vmem::PhysMapper) the kernel
//!   uses to reach nodes and page tables through the direct map.
//!
//! The allocator implements [`FrameAlloc`](kernel_vmem::FrameAlloc) and
//! [`BookkeepingFrames`](kernel_vmem::BookkeepingFrames), so it plugs
//! straight into the page-table code and the address-space bootstrap.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod frame_stack;
pub mod phys_mapper;


pub use frame_stack::{ENTRIES_PER_NODE, FrameStack, NodeFrames, PmmError};
