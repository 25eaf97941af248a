// =============================================================================
// Pulsar — Ticket Spinlock
// =============================================================================
//
// A ticket spinlock provides mutual exclusion for kernel data structures.
// It's the simplest fair lock: contenders acquire the lock in FIFO order,
// preventing starvation.
//
// HOW IT WORKS:
//   - Two counters: `next_ticket` and `now_serving`
//   - To lock: atomically increment `next_ticket`, get your ticket number.
//     Spin until `now_serving` equals your ticket.
//   - To unlock: increment `now_serving`, which lets the next waiter proceed.
//
// CONTEXT RULES:
//   The kernel's critical sections are short and bounded — a few loads and
//   stores on a ring index, a free-list head, or the ready set. The kernel
//   never calls application handlers while holding a lock. On a bare-metal
//   single-core target the integrator's port must mask interrupts around
//   regions that interrupt handlers also enter; on a hosted port the atomics
//   alone are sufficient. ISR-vs-thread context is tracked separately by the
//   scheduler's nesting counter, not hidden inside the lock.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

/// A ticket-based spinlock.
///
/// Suitable for protecting shared kernel data structures. Guarantees FIFO
/// ordering of waiters.
///
/// # Type Parameter
/// - `T`: The data protected by the lock. Must be `Send` because ownership
///   effectively transfers between contexts when the lock is acquired.
pub struct SpinLock<T> {
    /// The next ticket to be dispensed (atomically incremented by each locker).
    next_ticket: AtomicU32,

    /// The ticket number currently being served (incremented on unlock).
    now_serving: AtomicU32,

    /// The protected data. UnsafeCell is required because we mutate through
    /// a shared reference (the lock ensures exclusive access at runtime).
    data: UnsafeCell<T>,
}

// SAFETY: SpinLock<T> can be shared between execution contexts as long as T
// itself can be sent between them. The lock ensures that only one context
// accesses T at a time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock wrapping the given value.
    ///
    /// The lock is initially unlocked (`next_ticket == now_serving == 0`).
    /// This is a const fn so spinlocks can be used in statics.
    pub const fn new(value: T) -> Self {
        Self {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is available.
    ///
    /// Returns a [`SpinLockGuard`] that provides `Deref`/`DerefMut` access
    /// to the protected data. The lock is automatically released when the
    /// guard is dropped.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        // Take a ticket number atomically. Relaxed ordering is fine here —
        // the spin loop below provides the necessary synchronization barrier.
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        // Spin until our ticket is being served. Acquire ordering ensures we
        // see all writes made by the previous lock holder before we access
        // the protected data.
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            core::hint::spin_loop();
        }

        SpinLockGuard { lock: self }
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// This is safe because `&mut self` guarantees exclusive access at
    /// compile time — no lock needed. Useful during initialization before
    /// the lock is shared.
    #[allow(dead_code)]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

/// RAII guard for a held spinlock.
///
/// While this guard exists the holder has exclusive access to the protected
/// data; other contexts trying to `lock()` will spin. When the guard is
/// dropped the lock is released. This follows the RAII pattern — you can
/// never forget to unlock because the compiler ensures `drop()` is called.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: We hold the lock, so we have exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    /// Releases the lock.
    ///
    /// Release ordering ensures all our writes to the protected data are
    /// visible to the next lock holder before they see the incremented
    /// `now_serving` value.
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_roundtrip() {
        static COUNTER: SpinLock<u64> = SpinLock::new(0);
        {
            let mut guard = COUNTER.lock();
            *guard += 1;
        }
        assert_eq!(*COUNTER.lock(), 1);
    }

    #[test]
    fn fifo_under_contention() {
        use std::sync::Arc;

        let lock = Arc::new(SpinLock::new(0u32));
        let mut handles = std::vec::Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
