use crate::{TaskContext, TaskId, TrapFrame};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::cr3::Cr3;
use log::{error, trace};

/// Picks the task that runs after each tick and stores task contexts.
pub trait Scheduler {
    /// The task whose state is live on the CPU, if any.
    fn current(&self) -> Option<TaskId>;

    /// Decide which task runs next and make it current.
    ///
    /// Returning the current task, or `None`, leaves the CPU as it is.
    fn schedule(&mut self) -> Option<TaskId>;

    fn context(&self, id: TaskId) -> Option<&TaskContext>;

    fn context_mut(&mut self, id: TaskId) -> Option<&mut TaskContext>;

    /// Stack a privilege change must land on while `id` runs (`TSS.RSP0`).
    fn kernel_stack_top(&self, _id: TaskId) -> Option<VirtualAddress> {
        None
    }
}

/// Access to the loaded page-table base (CR3).
pub trait PageTableBase {
    fn read(&self) -> Cr3;

    /// Load `cr3`, flushing non-global translations.
    fn write(&mut self, cr3: Cr3);
}

/// The interrupt controller's end-of-interrupt signal.
pub trait EndOfInterrupt {
    fn end_of_interrupt(&self);
}

/// What a tick did, for tracing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The frame was left untouched.
    Resumed(Option<TaskId>),
    /// The frame now holds `to`'s saved state.
    Switched {
        from: Option<TaskId>,
        to: TaskId,
        cr3_reloaded: bool,
        /// `RSP0` for `to`, when the scheduler tracks one.
        kernel_stack_top: Option<VirtualAddress>,
    },
}

/// Run one timer tick against the frame the entry stub pushed.
///
/// The state of the current task (if any) is captured, the scheduler picks
/// the next task, and if that is a different task its saved state replaces
/// `frame`. CR3 is only written when the next task's value differs from the
/// loaded one. The end-of-interrupt is signalled exactly once, after the
/// frame is final.
pub fn handle_timer_tick<S, P, E>(
    frame: &mut TrapFrame,
    scheduler: &mut S,
    cr3: &mut P,
    eoi: &E,
) -> SwitchOutcome
where
    S: Scheduler + ?Sized,
    P: PageTableBase + ?Sized,
    E: EndOfInterrupt + ?Sized,
{
    let previous = scheduler.current();
    if let Some(id) = previous {
        let loaded = cr3.read();
        match scheduler.context_mut(id) {
            Some(saved) => *saved = TaskContext::new(*frame, loaded),
            None => error!("current {id} has no context; its state is lost"),
        }
    }

    let outcome = match scheduler.schedule() {
        Some(next) if Some(next) != previous => restore(frame, scheduler, cr3, previous, next),
        next => SwitchOutcome::Resumed(next.or(previous)),
    };

    eoi.end_of_interrupt();
    outcome
}

fn restore<S, P>(
    frame: &mut TrapFrame,
    scheduler: &S,
    cr3: &mut P,
    from: Option<TaskId>,
    to: TaskId,
) -> SwitchOutcome
where
    S: Scheduler + ?Sized,
    P: PageTableBase + ?Sized,
{
    let Some(next) = scheduler.context(to).copied() else {
        error!("scheduled {to} has no context; resuming the interrupted code");
        return SwitchOutcome::Resumed(from);
    };

    *frame = next.frame;
    let cr3_reloaded = cr3.read() != next.cr3;
    if cr3_reloaded {
        cr3.write(next.cr3);
    }

    trace!("switch {from:?} -> {to} (rip={:#x})", next.frame.rip);
    SwitchOutcome::Switched {
        from,
        to,
        cr3_reloaded,
        kernel_stack_top: scheduler.kernel_stack_top(to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use crate::RoundRobin;
    use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
    use std::collections::VecDeque;

    fn cr3_at(pa: u64) -> Cr3 {
        Cr3::from_pml4(PhysicalPage::containing(PhysicalAddress::new(pa)))
    }

    fn frame_with(rip: u64, rax: u64) -> TrapFrame {
        TrapFrame {
            rip,
            rax,
            r15: rax ^ 0xFF,
            rflags: 0x202,
            cs: 0x38,
            ss: 0x30,
            rsp: 0xFFFF_FF00_0000_8000,
            vector: 32,
            ..TrapFrame::default()
        }
    }

    /// Replays a fixed sequence of decisions.
    struct Scripted {
        current: Option<TaskId>,
        contexts: Vec<TaskContext>,
        decisions: VecDeque<Option<TaskId>>,
    }

    impl Scripted {
        fn new(current: Option<TaskId>, contexts: Vec<TaskContext>, decisions: &[Option<u16>]) -> Self {
            Self {
                current,
                contexts,
                decisions: decisions.iter().map(|d| d.map(TaskId)).collect(),
            }
        }
    }

    impl Scheduler for Scripted {
        fn current(&self) -> Option<TaskId> {
            self.current
        }

        fn schedule(&mut self) -> Option<TaskId> {
            let next = self.decisions.pop_front().flatten();
            if next.is_some() {
                self.current = next;
            }
            next
        }

        fn context(&self, id: TaskId) -> Option<&TaskContext> {
            self.contexts.get(usize::from(id.0))
        }

        fn context_mut(&mut self, id: TaskId) -> Option<&mut TaskContext> {
            self.contexts.get_mut(usize::from(id.0))
        }
    }

    struct FakeCr3 {
        loaded: Cr3,
        writes: Vec<Cr3>,
    }

    impl FakeCr3 {
        fn new(loaded: Cr3) -> Self {
            Self {
                loaded,
                writes: Vec::new(),
            }
        }
    }

    impl PageTableBase for FakeCr3 {
        fn read(&self) -> Cr3 {
            self.loaded
        }

        fn write(&mut self, cr3: Cr3) {
            self.loaded = cr3;
            self.writes.push(cr3);
        }
    }

    #[derive(Default)]
    struct CountingEoi(Cell<usize>);

    impl EndOfInterrupt for CountingEoi {
        fn end_of_interrupt(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn same_task_leaves_the_frame_byte_identical() {
        let kernel = cr3_at(0x10_0000);
        let mut sched = Scripted::new(
            Some(TaskId(0)),
            vec![TaskContext::new(frame_with(0x1000, 1), kernel)],
            &[Some(0)],
        );
        let mut cr3 = FakeCr3::new(kernel);
        let eoi = CountingEoi::default();

        let entry = frame_with(0xFFFF_FFFF_8010_4321, 0xDEAD_BEEF);
        let mut frame = entry;
        let outcome = handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi);

        assert_eq!(outcome, SwitchOutcome::Resumed(Some(TaskId(0))));
        assert_eq!(frame, entry);
        // The current state was still captured.
        assert_eq!(sched.contexts[0].frame, entry);
        assert!(cr3.writes.is_empty());
        assert_eq!(eoi.0.get(), 1);
    }

    #[test]
    fn switching_restores_the_other_task_exactly() {
        let kernel = cr3_at(0x10_0000);
        let b_state = frame_with(0xFFFF_FFFF_8010_B000, 0xBBBB);
        let mut sched = Scripted::new(
            Some(TaskId(0)),
            vec![
                TaskContext::new(TrapFrame::default(), kernel),
                TaskContext::new(b_state, kernel),
            ],
            &[Some(1)],
        );
        let mut cr3 = FakeCr3::new(kernel);
        let eoi = CountingEoi::default();

        let a_state = frame_with(0xFFFF_FFFF_8010_A000, 0xAAAA);
        let mut frame = a_state;
        let outcome = handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi);

        assert_eq!(
            outcome,
            SwitchOutcome::Switched {
                from: Some(TaskId(0)),
                to: TaskId(1),
                cr3_reloaded: false,
                kernel_stack_top: None,
            }
        );
        assert_eq!(frame, b_state);
        assert_eq!(sched.contexts[0], TaskContext::new(a_state, kernel));
        assert!(cr3.writes.is_empty());
        assert_eq!(eoi.0.get(), 1);
    }

    #[test]
    fn cr3_is_written_only_when_it_changes() {
        let a_space = cr3_at(0x10_0000);
        let b_space = cr3_at(0x20_0000);
        let mut sched = Scripted::new(
            Some(TaskId(0)),
            vec![
                TaskContext::new(frame_with(0xA, 0), a_space),
                TaskContext::new(frame_with(0xB, 0), b_space),
            ],
            &[Some(1), Some(0), Some(0)],
        );
        let mut cr3 = FakeCr3::new(a_space);
        let eoi = CountingEoi::default();
        let mut frame = frame_with(0xA, 0);

        let outcome = handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi);
        assert!(matches!(outcome, SwitchOutcome::Switched { cr3_reloaded: true, .. }));
        assert_eq!(cr3.writes, vec![b_space]);

        let outcome = handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi);
        assert!(matches!(outcome, SwitchOutcome::Switched { cr3_reloaded: true, .. }));
        assert_eq!(cr3.writes, vec![b_space, a_space]);
        // B's captured CR3 is the one that was loaded while it ran.
        assert_eq!(sched.contexts[1].cr3, b_space);

        handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi);
        assert_eq!(cr3.writes.len(), 2);
        assert_eq!(eoi.0.get(), 3);
    }

    #[test]
    fn first_tick_without_a_current_task_skips_capture() {
        let kernel = cr3_at(0x10_0000);
        let seed = TrapFrame::for_entry(0xFFFF_FFFF_8010_0040, 0xFFFF_FF00_0002_0000, 0x38, 0x30);
        let mut sched = Scripted::new(None, vec![TaskContext::new(seed, kernel)], &[Some(0)]);
        let mut cr3 = FakeCr3::new(kernel);
        let eoi = CountingEoi::default();

        let boot = frame_with(0xFFFF_FFFF_8010_9999, 7);
        let mut frame = boot;
        let outcome = handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi);

        assert_eq!(
            outcome,
            SwitchOutcome::Switched {
                from: None,
                to: TaskId(0),
                cr3_reloaded: false,
                kernel_stack_top: None,
            }
        );
        assert_eq!(frame, seed);
        assert_eq!(sched.contexts[0].frame, seed);
        assert_eq!(eoi.0.get(), 1);
    }

    #[test]
    fn no_decision_is_a_no_op() {
        let kernel = cr3_at(0x10_0000);
        let mut sched = Scripted::new(None, Vec::new(), &[None]);
        let mut cr3 = FakeCr3::new(kernel);
        let eoi = CountingEoi::default();

        let boot = frame_with(0x1234, 5);
        let mut frame = boot;
        assert_eq!(
            handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi),
            SwitchOutcome::Resumed(None)
        );
        assert_eq!(frame, boot);
        assert_eq!(eoi.0.get(), 1);
    }

    #[test]
    fn missing_context_resumes_the_interrupted_code() {
        let kernel = cr3_at(0x10_0000);
        let mut sched = Scripted::new(None, Vec::new(), &[Some(3)]);
        let mut cr3 = FakeCr3::new(kernel);
        let eoi = CountingEoi::default();

        let boot = frame_with(0x1234, 5);
        let mut frame = boot;
        assert_eq!(
            handle_timer_tick(&mut frame, &mut sched, &mut cr3, &eoi),
            SwitchOutcome::Resumed(None)
        );
        assert_eq!(frame, boot);
        assert!(cr3.writes.is_empty());
        assert_eq!(eoi.0.get(), 1);
    }

    #[test]
    fn switch_reports_the_next_tasks_kernel_stack() {
        let kernel = cr3_at(0x10_0000);
        let top = VirtualAddress::new(0xFFFF_FF00_0020_5000);
        let seed = TrapFrame::for_entry(0xFFFF_FFFF_8010_0040, top.as_u64(), 0x38, 0x30);
        let mut rr: RoundRobin = RoundRobin::new();
        let id = rr
            .spawn("worker", TaskContext::new(seed, kernel), top)
            .unwrap();
        let mut cr3 = FakeCr3::new(kernel);
        let eoi = CountingEoi::default();

        let mut frame = frame_with(0xFFFF_FFFF_8010_9999, 1);
        let outcome = handle_timer_tick(&mut frame, &mut rr, &mut cr3, &eoi);

        assert_eq!(
            outcome,
            SwitchOutcome::Switched {
                from: None,
                to: id,
                cr3_reloaded: false,
                kernel_stack_top: Some(top),
            }
        );
        assert_eq!(frame, seed);
    }
}
