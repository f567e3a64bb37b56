//! # Timer-Driven Context Switch
//!
//! The mechanism that swaps tasks on every timer tick. The naked interrupt
//! stub pushes a [`TrapFrame`] and calls into the kernel, which forwards to
//! [`handle_timer_tick`]:
//!
//! ```text
//!  Interrupted ─► Captured ─► Scheduled ─► Restored / no-op ─► EOI ─► iretq
//!                  (frame +     (policy)    (frame overwrite,
//!                   CR3 saved)               CR3 if changed)
//! ```
//!
//! Policy lives behind the [`Scheduler`] trait. [`RoundRobin`] is the
//! scheduler the kernel ships with. The CPU side effects (CR3 and the
//! interrupt controller's end-of-interrupt) sit behind [`PageTableBase`] and
//! [`EndOfInterrupt`] so the handler runs unchanged against fakes in tests.

#![cfg_attr(not(test), no_std)]

mod context;
pub mod round_robin;
mod switch;
mod trap_frame;

pub use crate::context::{TaskContext, TaskId};
pub use crate::round_robin::{MAX_TASKS, RoundRobin, SchedulerError, Task, TaskState};
pub use crate::switch::{
    EndOfInterrupt, PageTableBase, Scheduler, SwitchOutcome, handle_timer_tick,
};
pub use crate::trap_frame::{RFLAGS_IF, RFLAGS_RESERVED, TrapFrame};
pub use kernel_registers::cr3::Cr3;
