//! Dynamic events — pool-backed allocation and garbage collection.
//!
//! A dynamic event is born in an event pool, travels by reference through
//! queues and handlers, and returns to its pool exactly when the last
//! reference lets go. The post and publish operations take references on
//! behalf of each receiver; the scheduler garbage-collects after every
//! run-to-completion step.
//!
//! Payload types must be plain data: the collector returns raw blocks and
//! never runs destructors.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::evt::{Evt, Payload};
use crate::memory::pool;
use crate::NO_MARGIN;

/// Allocates a dynamic event, moving `val` into a pool block.
///
/// The embedded header of `val` supplies the signal; its pool identity and
/// reference counter are rewritten for the block the event lands in. The
/// returned reference is exclusive until the event is posted or published.
///
/// Allocation failure is fatal — use [`new_x`] when the application can
/// tolerate (and must handle) exhaustion.
pub fn new<T: Payload>(val: T) -> &'static mut T {
    match alloc(val, NO_MARGIN) {
        Some(e) => e,
        // alloc with NO_MARGIN asserts inside the pool instead of failing
        None => unreachable!(),
    }
}

/// Allocates a dynamic event, keeping at least `margin` blocks in reserve.
///
/// Returns `None` — leaving the pool untouched — when fewer than
/// `margin + 1` blocks remain. A `margin` of [`NO_MARGIN`] behaves like
/// [`new`].
pub fn new_x<T: Payload>(margin: u16, val: T) -> Option<&'static mut T> {
    let e = alloc(val, margin);
    if e.is_none() {
        log::warn!("[evt] allocation of {} bytes denied (margin {})", size_of::<T>(), margin);
    }
    e
}

fn alloc<T: Payload>(val: T, margin: u16) -> Option<&'static mut T> {
    let sig = val.evt().sig();
    let (blk, pool_id) = pool::alloc_block(size_of::<T>(), align_of::<T>(), margin)?;
    let p: NonNull<T> = blk.cast();
    // SAFETY: the block is at least size_of::<T>() bytes, properly aligned,
    // and exclusively ours until this function returns.
    unsafe {
        p.as_ptr().write(val);
        // Rewrite the header: same signal, but owned by pool `pool_id`
        // with a fresh reference counter.
        (p.as_ptr() as *mut Evt).write(Evt::dynamic(sig, pool_id));
        Some(&mut *p.as_ptr())
    }
}

/// Garbage-collects one reference to `e`.
///
/// Static events are ignored. For dynamic events the reference counter is
/// decremented; on the last release the block returns to its originating
/// pool. Every receiver of a posted or published event owes exactly one
/// `gc` call — the scheduler pays this debt after each dispatch step.
pub fn gc(e: &Evt) {
    if !e.is_dynamic() {
        return;
    }
    if e.ref_dec() == 0 {
        let pool_id = e.pool_id();
        log::trace!("[evt] recycling sig {} to pool {}", e.sig(), pool_id);
        // SAFETY: the count reached zero, so no queue or handler still
        // refers to the event; the pointer is the block we allocated.
        pool::free_block(pool_id, NonNull::from(e).cast());
    }
}

/// Decrements the counter of an event known to stay referenced.
///
/// Used by recall, where the event has just been LIFO-posted back to the
/// caller's own queue: the queue's reference keeps the event alive, so a
/// full [`gc`] check would be wasted work and a count of zero is a bug.
pub(crate) fn ref_dec_pinned(e: &Evt) {
    if e.is_dynamic() {
        let left = e.ref_dec();
        assert!(left > 0, "evt: pinned event lost its last reference");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evt::SIG_USER;
    use crate::testsupport::kernel_test;

    #[repr(C)]
    struct WideEvt {
        base: Evt,
        data: [u32; 4],
    }
    // SAFETY: repr(C), Evt first.
    unsafe impl Payload for WideEvt {}

    fn setup() {
        pool::init(Box::leak(vec![0u8; 128].into_boxed_slice()), 8);
        pool::init(Box::leak(vec![0u8; 256].into_boxed_slice()), 32);
    }

    #[test]
    fn new_picks_smallest_fit_and_gc_closes() {
        let _k = kernel_test();
        setup();

        let small = new(Evt::stat(SIG_USER));
        assert_eq!(small.pool_id(), 1);

        let wide = new(WideEvt {
            base: Evt::stat(SIG_USER + 1),
            data: [0; 4],
        });
        assert_eq!(wide.evt().pool_id(), 2);
        assert_eq!(wide.evt().sig(), SIG_USER + 1);

        let free_before = pool::stats(1).free;
        // One reference taken on behalf of the only holder, then released.
        small.ref_inc();
        gc(small);
        assert_eq!(pool::stats(1).free, free_before + 1);
    }

    #[test]
    fn gc_ignores_static_events() {
        let _k = kernel_test();
        static TICK: Evt = Evt::stat(SIG_USER);
        gc(&TICK); // must be a no-op, not an underflow
        assert_eq!(TICK.ref_ctr(), 0);
    }

    #[test]
    fn multiple_references_delay_recycling() {
        let _k = kernel_test();
        setup();

        let e = new(Evt::stat(SIG_USER));
        e.ref_inc();
        e.ref_inc();
        let free_after_alloc = pool::stats(1).free;

        gc(e);
        assert_eq!(pool::stats(1).free, free_after_alloc, "still referenced");
        gc(e);
        assert_eq!(pool::stats(1).free, free_after_alloc + 1, "last ref frees");
    }
}
