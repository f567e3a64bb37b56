use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A value behind a test-and-test-and-set flag.
///
/// There is no owner tracking and no fairness. On the single core this
/// kernel runs on, contention only comes from an interrupt handler entering
/// a lock the interrupted code holds; such locks are taken with
/// [`lock_irq`](SpinMutex::lock_irq) outside the handler and with
/// [`try_lock`](SpinMutex::try_lock) inside it.
pub struct SpinMutex<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`.
unsafe impl<T: Send> Sync for SpinMutex<T> {}
unsafe impl<T: Send> Send for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Spin until the flag is ours.
    #[inline]
    pub fn lock(&self) -> SpinGuard<'_, T> {
        while !self.acquire() {
            while self.is_locked() {
                spin_loop();
            }
        }
        SpinGuard { mutex: self }
    }

    /// Take the lock only if nobody holds it.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        self.acquire().then(|| SpinGuard { mutex: self })
    }

    /// Run `f` on the value with the lock held. Unwinding out of `f` still
    /// releases the lock.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Whether some guard is alive right now. Only a hint.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn acquire(&self) -> bool {
        !self.locked.swap(true, Ordering::Acquire)
    }
}

impl<T: Default> Default for SpinMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Access to a locked [`SpinMutex`]; dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held, and `&mut self` makes
        // this the only reference.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
    }
}
