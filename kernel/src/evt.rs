//! Events — the currency of the kernel.
//!
//! An event is a signal plus optional payload. The [`Evt`] header carries
//! the signal, the identity of the pool the event came from (0 for static,
//! immutable events), and a reference counter that tracks how many queues
//! and handlers still hold the event.
//!
//! Application payloads embed `Evt` as their first field:
//!
//! ```
//! use pulsar_kernel::evt::{Evt, Payload};
//!
//! #[repr(C)]
//! struct HungryEvt {
//!     base: Evt,
//!     philo_id: u8,
//! }
//!
//! // SAFETY: repr(C) with Evt as the first field.
//! unsafe impl Payload for HungryEvt {}
//! ```

use core::sync::atomic::{AtomicU8, Ordering};

// ── Signals ─────────────────────────────────────────────────────

/// Signal of an event — identifies what happened.
///
/// 16 bits: wide enough for real applications, narrow enough to keep event
/// headers at four bytes on 32-bit targets.
pub type Signal = u16;

/// Internal probe asking a state handler for its superstate.
/// Never delivered to applications.
pub const SIG_EMPTY: Signal = 0;
/// State entry action, delivered only as part of a transition.
pub const SIG_ENTRY: Signal = 1;
/// State exit action, delivered only as part of a transition.
pub const SIG_EXIT: Signal = 2;
/// Nested initial transition within a just-entered state.
pub const SIG_INIT: Signal = 3;
/// First signal available to applications.
pub const SIG_USER: Signal = 4;

// ── Event header ────────────────────────────────────────────────

/// The event header.
///
/// Every event begins with this header; payload-carrying events embed it as
/// their first field (see [`Payload`]).
///
/// Two kinds of events exist:
/// - **static** (`pool_id == 0`): immutable, never reference-counted, never
///   reclaimed. Typically `static` constants or time events.
/// - **dynamic** (`pool_id > 0`): allocated from event pool `pool_id`,
///   reclaimed by the garbage collector exactly when the last holder lets
///   go (reference counter reaches zero).
#[repr(C)]
#[derive(Debug)]
pub struct Evt {
    sig: Signal,
    pool_id: u8,
    ref_ctr: AtomicU8,
}

impl Evt {
    /// Creates a static (immutable, never-freed) event.
    ///
    /// Const so applications can keep signal-only events in `static`s and
    /// share them freely — the kernel never mutates a static event.
    pub const fn stat(sig: Signal) -> Self {
        Self {
            sig,
            pool_id: 0,
            ref_ctr: AtomicU8::new(0),
        }
    }

    /// Writes a dynamic-event header. Only the event memory manager creates
    /// dynamic events.
    pub(crate) const fn dynamic(sig: Signal, pool_id: u8) -> Self {
        Self {
            sig,
            pool_id,
            ref_ctr: AtomicU8::new(0),
        }
    }

    /// The event's signal.
    #[inline]
    pub fn sig(&self) -> Signal {
        self.sig
    }

    /// Pool identity: 0 for static events, 1-based pool index otherwise.
    #[inline]
    pub fn pool_id(&self) -> u8 {
        self.pool_id
    }

    /// Current reference count. Meaningless for static events.
    #[inline]
    pub fn ref_ctr(&self) -> u8 {
        self.ref_ctr.load(Ordering::Relaxed)
    }

    /// True for pool-allocated events that participate in reference
    /// counting and garbage collection.
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.pool_id != 0
    }

    /// Takes one reference. Caller must hold the kernel's critical region
    /// or otherwise serialize against [`Evt::ref_dec`].
    #[inline]
    pub(crate) fn ref_inc(&self) {
        let prev = self.ref_ctr.fetch_add(1, Ordering::Relaxed);
        assert!(prev < u8::MAX, "evt: reference counter overflow");
    }

    /// Drops one reference, returning the new count.
    #[inline]
    pub(crate) fn ref_dec(&self) -> u8 {
        let prev = self.ref_ctr.fetch_sub(1, Ordering::Relaxed);
        assert!(prev != 0, "evt: reference counter underflow");
        prev - 1
    }

    /// Reinterprets this event as its payload-carrying type.
    ///
    /// # Safety
    /// The event must actually be a `T` — i.e. it was created as a `T` and
    /// carries a signal the caller associates with that payload type.
    #[inline]
    pub unsafe fn downcast<T: Payload>(&self) -> &T {
        unsafe { &*(self as *const Evt as *const T) }
    }
}

// ── Payload marker ──────────────────────────────────────────────

/// Marker for application event types that embed [`Evt`] as their first
/// field.
///
/// # Safety
/// Implementors must be `#[repr(C)]` with an `Evt` as the very first field,
/// so that a pointer to the payload type is also a valid pointer to `Evt`
/// and vice versa.
pub unsafe trait Payload: Sized {
    /// The embedded event header.
    #[inline]
    fn evt(&self) -> &Evt {
        // SAFETY: guaranteed by the trait contract (repr(C), Evt first).
        unsafe { &*(self as *const Self as *const Evt) }
    }
}

// SAFETY: Evt trivially starts with itself.
unsafe impl Payload for Evt {}

// ── Counted reference handle ────────────────────────────────────

/// An owned reference to a dynamic event, beyond the ordinary receive
/// lifetime.
///
/// Taking an `EvtRef` increments the event's reference counter; dropping it
/// runs the garbage collector, which returns the event to its pool when the
/// count reaches zero. `Clone` takes an additional reference. This is the
/// explicit escape hatch used when an event must outlive the handler that
/// received it (deferred processing, cross-step bookkeeping).
pub struct EvtRef {
    ptr: core::ptr::NonNull<Evt>,
}

// SAFETY: the reference count keeps the pointed-to event alive, and all
// counter mutation is atomic.
unsafe impl Send for EvtRef {}
unsafe impl Sync for EvtRef {}

impl EvtRef {
    /// Takes a counted reference to a dynamic event.
    ///
    /// # Panics
    /// If `e` is a static event — static events are not reference-counted
    /// and never need pinning.
    pub fn new(e: &Evt) -> Self {
        assert!(e.is_dynamic(), "evt: EvtRef requires a dynamic event");
        e.ref_inc();
        Self {
            ptr: core::ptr::NonNull::from(e),
        }
    }

    /// The referenced event.
    #[inline]
    pub fn evt(&self) -> &Evt {
        // SAFETY: our reference keeps the event alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for EvtRef {
    fn clone(&self) -> Self {
        self.evt().ref_inc();
        Self { ptr: self.ptr }
    }
}

impl Drop for EvtRef {
    fn drop(&mut self) {
        // SAFETY: the pointer is valid until the counter reaches zero, and
        // this drop surrenders exactly the reference taken in `new`/`clone`.
        crate::memory::dynamic::gc(unsafe { self.ptr.as_ref() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_evt_header() {
        let e = Evt::stat(SIG_USER);
        assert_eq!(e.sig(), SIG_USER);
        assert_eq!(e.pool_id(), 0);
        assert!(!e.is_dynamic());
    }

    #[test]
    fn ref_counting() {
        let e = Evt::dynamic(SIG_USER, 1);
        e.ref_inc();
        e.ref_inc();
        assert_eq!(e.ref_ctr(), 2);
        assert_eq!(e.ref_dec(), 1);
        assert_eq!(e.ref_dec(), 0);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn ref_underflow_is_fatal() {
        let e = Evt::dynamic(SIG_USER, 1);
        e.ref_dec();
    }
}
