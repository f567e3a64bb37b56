//! # Kernel synchronization primitives
//!
//! Single-core building blocks for the kernel's global contexts:
//!
//! * [`SpinMutex`], a spin lock around a value.
//! * [`SyncOnceCell`], a write-once slot for state that is built during boot
//!   and only mutated through an inner lock afterwards.
//! * [`IrqGuard`] and [`SpinMutex::lock_irq`], which keep the timer interrupt
//!   from preempting a critical section that the interrupt path may also
//!   enter.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin;
mod sync_once_cell;

pub use irq::{IrqGuard, IrqSpinGuard};
pub use spin::{SpinGuard, SpinMutex};
pub use sync_once_cell::SyncOnceCell;
