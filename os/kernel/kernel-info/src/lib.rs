//! # Kernel Configuration and Boot Interface
//!
//! The data structures and layout constants shared by the loader, the kernel
//! binary and the memory subsystems. Everything here is plain data; the crate
//! contains no unsafe code.
//!
//! ## Modules
//!
//! * [`boot`]: the loader-to-kernel handoff record ([`KernelBootInfo`](boot::KernelBootInfo)),
//!   including the physical memory map that feeds the frame allocator.
//! * [`memory`]: the virtual address space layout (direct map, kernel image,
//!   kernel stack) and the fixed physical placement hints.
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Lower half (loader identity)  │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Map        │
//!                       │   (physical + HHDM_BASE)        │
//! KERNEL_STACK_BASE     ├─────────────────────────────────┤ 0xffff_ff00_0000_0000
//!                       │   guard page + kernel stack     │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │   Kernel text, rodata, data     │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Build Script Integration
//! ```rust
//! use kernel_info::memory::{KERNEL_BASE, PHYS_LOAD};
//!
//! println!("cargo:rustc-link-arg=--defsym=KERNEL_BASE={:#x}", KERNEL_BASE);
//! println!("cargo:rustc-link-arg=--defsym=PHYS_LOAD={:#x}", PHYS_LOAD);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
