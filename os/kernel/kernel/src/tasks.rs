//! # Kernel Tasks
//!
//! The global scheduler and the two demo tasks that show preemption. Each
//! task gets its own stack below the image and starts from a seeded
//! [`TrapFrame`], as if it had been interrupted right before its first
//! instruction.

use crate::idt::{current_cs, current_ss};
use crate::memory::{KernelError, map_task_stack};
use crate::timer;
use kernel_sync::{SpinMutex, SyncOnceCell};
use kernel_task::{Cr3, RoundRobin, SchedulerError, TaskContext, TaskId, TrapFrame};
use log::info;

static SCHEDULER: SyncOnceCell<SpinMutex<RoundRobin>> = SyncOnceCell::new();

/// Turns between two progress lines of a demo task.
const REPORT_EVERY: u64 = 8;

type TaskEntry = extern "C" fn() -> !;

const DEMO_TASKS: [(&str, TaskEntry); 2] = [("ping", ping), ("pong", pong)];

/// The scheduler, once tasks exist.
pub fn scheduler() -> Option<&'static SpinMutex<RoundRobin>> {
    SCHEDULER.get()
}

/// Create a task running `entry` on a fresh stack in address space `cr3`.
///
/// # Errors
/// Stack mapping failures or a full task table.
pub fn spawn(name: &'static str, entry: TaskEntry, cr3: Cr3) -> Result<TaskId, KernelError> {
    let mut scheduler = SCHEDULER
        .get_or_init(|| SpinMutex::new(RoundRobin::new()))
        .lock_irq();
    let slot = scheduler.next_id().ok_or(SchedulerError::TableFull)?;

    // A reused slot gets its old stack frames released and replaced.
    let top = map_task_stack(slot.0)?;
    let frame = TrapFrame::for_entry(
        entry as usize as u64,
        top.as_u64(),
        current_cs(),
        current_ss(),
    );
    let id = scheduler.spawn(name, TaskContext::new(frame, cr3), top)?;
    info!("{id} ({name}) ready, stack top {top}");
    Ok(id)
}

/// Spawn the demo tasks into the kernel address space.
///
/// # Errors
/// See [`spawn`].
pub fn spawn_demo_tasks(cr3: Cr3) -> Result<(), KernelError> {
    for (name, entry) in DEMO_TASKS {
        spawn(name, entry, cr3)?;
    }
    Ok(())
}

extern "C" fn ping() -> ! {
    run_demo("ping")
}

extern "C" fn pong() -> ! {
    run_demo("pong")
}

/// Count the ticks this task observes and report every few turns.
fn run_demo(name: &str) -> ! {
    let mut seen = timer::ticks();
    let mut turns = 0u64;
    loop {
        let now = timer::ticks();
        if now != seen {
            seen = now;
            turns += 1;
            if turns.is_multiple_of(REPORT_EVERY) {
                info!("{name}: turn {turns} at tick {now}");
            }
        }
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }
}
