use crate::TrapFrame;
use core::fmt;
use kernel_registers::cr3::Cr3;

/// Identifies a task within its scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u16);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Everything needed to resume a task at its last preemption point.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TaskContext {
    pub frame: TrapFrame,
    /// Page-table base the task runs under.
    pub cr3: Cr3,
}

impl TaskContext {
    #[must_use]
    pub const fn new(frame: TrapFrame, cr3: Cr3) -> Self {
        Self { frame, cr3 }
    }
}
