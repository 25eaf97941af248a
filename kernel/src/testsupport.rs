//! Shared scaffolding for kernel tests.
//!
//! The kernel is a process-wide singleton, exactly as it is on a target,
//! so tests that touch kernel state serialize on one lock and rewind the
//! kernel before running.

use std::sync::{Mutex, MutexGuard};

static KERNEL_LOCK: Mutex<()> = Mutex::new(());

/// Held for the duration of a kernel test.
pub(crate) struct KernelTest {
    _guard: MutexGuard<'static, ()>,
}

/// Serializes the test and rewinds every kernel singleton to boot state.
pub(crate) fn kernel_test() -> KernelTest {
    // A previous test may have panicked (should_panic scenarios do) while
    // holding the lock; the poison is meaningless because the next test
    // resets all kernel state anyway.
    let guard = KERNEL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    crate::memory::pool::reset();
    crate::sched::reset();
    crate::pubsub::reset();
    crate::time::reset();
    KernelTest { _guard: guard }
}

/// Ends the startup phase: opens the scheduler and dispatches anything
/// actors posted while starting.
pub(crate) fn begin_dispatch() {
    crate::sched::unlock_startup();
}
