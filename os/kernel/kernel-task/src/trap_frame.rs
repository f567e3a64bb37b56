use core::mem::offset_of;

/// Interrupt flag in RFLAGS.
pub const RFLAGS_IF: u64 = 1 << 9;

/// RFLAGS bit 1 always reads as one.
pub const RFLAGS_RESERVED: u64 = 1 << 1;

/// Machine state on the stack while the timer handler runs.
///
/// The entry stub builds this block from the top down: the CPU pushes
/// `ss`..`rip`, the stub pushes the error code placeholder, the vector and
/// then `rax` through `r15`. The stub passes `rsp` (pointing at `r15`) to the
/// handler, and its epilogue pops whatever the handler left here.
///
/// ```text
/// low addr   r15 r14 .. rbx rax | vector error_code | rip cs rflags rsp ss   high addr
///            └── pushed by stub ─────────────────────┘└── pushed by CPU ──┘
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Bytes the entry stub pushes before calling the handler.
    pub const STUB_PUSHED: usize = offset_of!(Self, rip);

    /// A frame that starts executing `entry` on the stack ending at
    /// `stack_top`, with interrupts enabled.
    ///
    /// `stack_top` is lowered by 8 so `entry` sees the same stack alignment
    /// as after a `call`.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn for_entry(entry: u64, stack_top: u64, cs: u16, ss: u16) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            vector: 0,
            error_code: 0,
            rip: entry,
            cs: cs as u64,
            rflags: RFLAGS_IF | RFLAGS_RESERVED,
            rsp: (stack_top & !0xF) - 8,
            ss: ss as u64,
        }
    }
}

const _: () = {
    assert!(size_of::<TrapFrame>() == 22 * 8);
    assert!(offset_of!(TrapFrame, r15) == 0);
    assert!(offset_of!(TrapFrame, rax) == 14 * 8);
    assert!(offset_of!(TrapFrame, vector) == 15 * 8);
    assert!(offset_of!(TrapFrame, error_code) == 16 * 8);
    assert!(TrapFrame::STUB_PUSHED == 17 * 8);
    assert!(offset_of!(TrapFrame, ss) == 21 * 8);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_frame_starts_with_interrupts_enabled() {
        let frame = TrapFrame::for_entry(0xFFFF_FFFF_8010_1234, 0xFFFF_FF00_0001_1000, 0x38, 0x30);
        assert_eq!(frame.rip, 0xFFFF_FFFF_8010_1234);
        assert_eq!(frame.rsp, 0xFFFF_FF00_0001_0FF8);
        assert_eq!(frame.rsp % 16, 8);
        assert_eq!((frame.cs, frame.ss), (0x38, 0x30));
        assert_eq!(frame.rflags, 0x202);
        assert_eq!(frame.rax, 0);
    }
}
