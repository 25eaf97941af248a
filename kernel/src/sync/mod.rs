//! Synchronization primitives for kernel-internal shared state.
//!
//! Everything the kernel mutates from both thread and interrupt context
//! (ready set, queue rings, free lists, wheel links, reference counters)
//! lives behind [`SpinLock`]. Critical sections are scoped guard
//! acquisitions, never open-coded enable/disable pairs, so every exit path
//! releases the region.

mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard};
