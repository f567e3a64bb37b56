//! Interrupt masking for critical sections shared with interrupt handlers.
//!
//! Uses `cli`/`sti` and `pushfq`, so everything here must run at CPL 0.

use crate::{SpinGuard, SpinMutex};
use core::ops::{Deref, DerefMut};

/// `RFLAGS.IF`.
const RFLAGS_IF: u64 = 1 << 9;

/// A mutex guard that also keeps interrupts disabled while held.
///
/// Fields drop in declaration order: the lock is released first, then the
/// interrupt state is restored.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqSpinGuard<'a, T> {
    guard: SpinGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqSpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> SpinMutex<T> {
    /// Acquires the mutex with interrupts disabled for the guard's lifetime.
    ///
    /// Code that shares a lock with the timer interrupt must use this; a plain
    /// [`lock`](SpinMutex::lock) could be interrupted while held and the handler
    /// would spin forever.
    #[inline]
    pub fn lock_irq(&self) -> IrqSpinGuard<'_, T> {
        let irq = IrqGuard::new();
        IrqSpinGuard {
            guard: self.lock(),
            _irq: irq,
        }
    }
}

/// Disables hardware interrupts (`cli`).
#[inline]
pub fn cli_stop_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// Enables hardware interrupts (`sti`).
#[inline]
pub fn sti_enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

/// Returns the current `RFLAGS` value (via `pushfq/pop`).
#[inline]
#[must_use]
pub fn rflags() -> u64 {
    let r: u64;
    unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(preserves_flags)) }
    r
}

/// Whether `RFLAGS.IF` is set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    rflags() & RFLAGS_IF != 0
}

/// RAII guard that disables interrupts on creation and restores the previous
/// state on drop.
///
/// ```no_run
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// ```
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}
