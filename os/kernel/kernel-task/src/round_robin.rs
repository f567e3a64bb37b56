//! # Round-Robin Scheduler
//!
//! A fixed table of up to [`MAX_TASKS`] tasks and a ring buffer of ready
//! task ids. On every tick the running task goes to the back of the queue
//! and the task at the front runs next.
//!
//! Only a task that was [`Running`](TaskState::Running) is put back in the
//! queue; a task that blocked or exited in the meantime stays out. When the
//! queue is empty the previous task keeps the CPU unless it has exited.

use crate::switch::Scheduler;
use crate::{TaskContext, TaskId};
use kernel_memory_addresses::VirtualAddress;
use log::{debug, info, warn};

/// Default capacity of a [`RoundRobin`].
pub const MAX_TASKS: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Waiting,
    Terminated,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("the task table is full")]
    TableFull,
    #[error("no task with id {0}")]
    UnknownTask(TaskId),
    #[error("{0} is {1:?}")]
    InvalidState(TaskId, TaskState),
}

#[derive(Debug)]
pub struct Task {
    name: &'static str,
    state: TaskState,
    context: TaskContext,
    kernel_stack_top: VirtualAddress,
    has_run: bool,
}

impl Task {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    #[must_use]
    pub const fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Top of the stack the task's kernel code runs on.
    #[must_use]
    pub const fn kernel_stack_top(&self) -> VirtualAddress {
        self.kernel_stack_top
    }

    /// Whether the task was ever picked by the scheduler.
    #[must_use]
    pub const fn has_run(&self) -> bool {
        self.has_run
    }
}

/// FIFO ring of task ids.
struct ReadyQueue<const N: usize> {
    slots: [Option<TaskId>; N],
    head: usize,
    tail: usize,
    len: usize,
}

impl<const N: usize> ReadyQueue<N> {
    const fn new() -> Self {
        Self {
            slots: [None; N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Fails only when full.
    const fn push(&mut self, id: TaskId) -> Result<(), TaskId> {
        if self.len == N {
            return Err(id);
        }
        self.slots[self.tail] = Some(id);
        self.tail = (self.tail + 1) % N;
        self.len += 1;
        Ok(())
    }

    fn contains(&self, id: TaskId) -> bool {
        (0..self.len).any(|i| self.slots[(self.head + i) % N] == Some(id))
    }

    const fn pop(&mut self) -> Option<TaskId> {
        if self.len == 0 {
            return None;
        }
        let id = self.slots[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        id
    }
}

/// Round-robin [`Scheduler`] over at most `N` tasks.
pub struct RoundRobin<const N: usize = MAX_TASKS> {
    tasks: [Option<Task>; N],
    ready: ReadyQueue<N>,
    current: Option<TaskId>,
}

impl<const N: usize> Default for RoundRobin<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RoundRobin<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks: [const { None }; N],
            ready: ReadyQueue::new(),
            current: None,
        }
    }

    /// Add a task that starts from `context` and queue it.
    ///
    /// # Errors
    /// [`SchedulerError::TableFull`] when all `N` slots hold live tasks.
    /// Slots of terminated tasks that are no longer current are reused.
    pub fn spawn(
        &mut self,
        name: &'static str,
        context: TaskContext,
        kernel_stack_top: VirtualAddress,
    ) -> Result<TaskId, SchedulerError> {
        let id = self.next_id().ok_or(SchedulerError::TableFull)?;
        let slot = usize::from(id.0);
        self.tasks[slot] = Some(Task {
            name,
            state: TaskState::Ready,
            context,
            kernel_stack_top,
            has_run: false,
        });
        // A reused slot may still have a stale queue entry.
        if !self.ready.contains(id) && self.ready.push(id).is_err() {
            self.tasks[slot] = None;
            return Err(SchedulerError::TableFull);
        }

        info!("spawned {id} '{name}' (rip={:#x})", context.frame.rip);
        Ok(id)
    }

    /// The id the next [`spawn`](Self::spawn) hands out, if a slot is free.
    #[must_use]
    pub fn next_id(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .enumerate()
            .position(|(i, t)| match t {
                None => true,
                Some(t) => t.state == TaskState::Terminated && self.current != Some(id_of(i)),
            })
            .map(id_of)
    }

    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(usize::from(id.0))?.as_ref()
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, SchedulerError> {
        self.tasks
            .get_mut(usize::from(id.0))
            .and_then(Option::as_mut)
            .ok_or(SchedulerError::UnknownTask(id))
    }

    /// Park a ready or running task until [`wake`](Self::wake).
    ///
    /// A running task keeps the CPU until the next tick.
    ///
    /// # Errors
    /// Unknown ids, and tasks that are already waiting or terminated.
    pub fn block(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.task_mut(id)?;
        match task.state {
            TaskState::Ready | TaskState::Running => {
                task.state = TaskState::Waiting;
                debug!("{id} '{}' is waiting", task.name);
                Ok(())
            }
            state => Err(SchedulerError::InvalidState(id, state)),
        }
    }

    /// Make a waiting task ready again.
    ///
    /// # Errors
    /// Unknown ids, and tasks that are not waiting.
    pub fn wake(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let is_current = self.current == Some(id);
        let task = self.task_mut(id)?;
        if task.state != TaskState::Waiting {
            return Err(SchedulerError::InvalidState(id, task.state));
        }
        // A current task is queued again when its tick ends.
        if is_current {
            task.state = TaskState::Running;
            return Ok(());
        }
        task.state = TaskState::Ready;
        if !self.ready.contains(id) && self.ready.push(id).is_err() {
            warn!("ready queue full; {id} stays waiting");
            if let Ok(task) = self.task_mut(id) {
                task.state = TaskState::Waiting;
            }
        }
        Ok(())
    }

    /// Mark a task as finished. It is never scheduled again.
    ///
    /// # Errors
    /// Unknown ids.
    pub fn terminate(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.task_mut(id)?;
        task.state = TaskState::Terminated;
        info!("{id} '{}' terminated", task.name);
        Ok(())
    }

    /// Next queued task that is still ready.
    fn pop_ready(&mut self) -> Option<TaskId> {
        while let Some(id) = self.ready.pop() {
            if self.task(id).is_some_and(|t| t.state == TaskState::Ready) {
                return Some(id);
            }
        }
        None
    }
}

impl<const N: usize> Scheduler for RoundRobin<N> {
    fn current(&self) -> Option<TaskId> {
        self.current
    }

    fn schedule(&mut self) -> Option<TaskId> {
        let previous = self.current;
        if let Some(id) = previous
            && let Ok(task) = self.task_mut(id)
            && task.state == TaskState::Running
        {
            task.state = TaskState::Ready;
            if self.ready.push(id).is_err() {
                warn!("ready queue full; {id} could not be re-queued");
            }
        }

        if let Some(next) = self.pop_ready() {
            if let Ok(task) = self.task_mut(next) {
                task.state = TaskState::Running;
                task.has_run = true;
            }
            self.current = Some(next);
            return Some(next);
        }

        // Nothing is ready: stay on the previous task unless it exited.
        self.current = previous.filter(|&id| {
            self.task(id)
                .is_some_and(|t| t.state != TaskState::Terminated)
        });
        if let Some(id) = self.current
            && let Ok(task) = self.task_mut(id)
            && task.state == TaskState::Ready
        {
            task.state = TaskState::Running;
        }
        self.current
    }

    fn kernel_stack_top(&self, id: TaskId) -> Option<VirtualAddress> {
        self.task(id).map(Task::kernel_stack_top)
    }

    fn context(&self, id: TaskId) -> Option<&TaskContext> {
        self.task(id).map(Task::context)
    }

    fn context_mut(&mut self, id: TaskId) -> Option<&mut TaskContext> {
        self.task_mut(id).ok().map(|t| &mut t.context)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn id_of(slot: usize) -> TaskId {
    TaskId(slot as u16)
}
