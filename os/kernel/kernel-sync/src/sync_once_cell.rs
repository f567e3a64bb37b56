use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Copy, Clone)]
enum State {
    Empty = 0,
    Writing = 1,
    Ready = 2,
}

/// A slot that is filled at most once and then shared read-only.
///
/// The kernel's global contexts (frame allocator, address space, scheduler,
/// Local APIC) live in these. A reader that finds the slot mid-write spins,
/// so an interrupt handler must use [`get`](Self::get), never
/// [`get_or_init`](Self::get_or_init). An `init` that unwinds leaves the
/// slot unusable.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: the value is written by the single thread that won `claim` and
// only shared after `Ready` is published.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(State::Empty as u8),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// The value, if it has been published.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.is_ready().then(|| unsafe { self.ready_value() })
    }

    /// Fill the slot with `value`.
    ///
    /// # Errors
    /// Returns `value` if the slot is already filled or being filled.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self.claim() {
            self.publish(value);
            Ok(())
        } else {
            Err(value)
        }
    }

    /// The value, filling the slot with `init()` first if it is empty.
    #[must_use]
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if !self.is_ready() && self.claim() {
            self.publish(init());
        }
        while !self.is_ready() {
            spin_loop();
        }
        // SAFETY: ready was observed with acquire ordering.
        unsafe { self.ready_value() }
    }

    fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == State::Ready as u8
    }

    /// Move from `Empty` to `Writing`; `true` for the one caller that wins.
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(
                State::Empty as u8,
                State::Writing as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    fn publish(&self, value: T) {
        // SAFETY: only the winner of `claim` gets here, and no reader looks
        // at the slot before `Ready`.
        unsafe { (*self.value.get()).write(value) };
        self.state.store(State::Ready as u8, Ordering::Release);
    }

    /// # Safety
    /// `Ready` must have been observed.
    unsafe fn ready_value(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == State::Ready as u8 {
            // SAFETY: `Ready` means the value was written.
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}
