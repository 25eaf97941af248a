//! Time events — one-shot and periodic timeouts driven by tick interrupts.
//!
//! A [`TimeEvt`] *is* an event (static, never garbage-collected) that posts
//! itself to its target actor when its down-counter expires. Armed time
//! events are threaded on a singly-linked list per tick rate; each rate's
//! list is walked by [`tick`], which the integrator calls from the
//! corresponding periodic interrupt.
//!
//! Disarming never unlinks on the spot — the walk itself excises
//! pending-disarm entries, so `disarm` is a non-blocking cancel that is
//! safe from any context, including a handler running in the middle of the
//! walk that armed it.

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, Ordering};

use bitflags::bitflags;

use crate::actor::ActorRef;
use crate::evt::{Evt, Payload, SIG_USER, Signal};
use crate::sched;
use crate::sync::SpinLock;
use crate::{MAX_TICK_RATES, NO_MARGIN};

bitflags! {
    /// Time-event life-cycle flags. Armed-without-linked never occurs;
    /// linked-without-armed is the pending-disarm state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TimeFlags: u8 {
        /// Counting down; will post on expiry.
        const ARMED = 1 << 0;
        /// Threaded on its rate's list.
        const LINKED = 1 << 1;
    }
}

// ── The timing wheel ────────────────────────────────────────────

struct TickList {
    head: *mut TimeEvt,
}

// SAFETY: the raw links are only followed under the rate's spinlock, and
// linked time events are pinned by the `arm` contract.
unsafe impl Send for TickList {}

static WHEEL: [SpinLock<TickList>; MAX_TICK_RATES] =
    [const { SpinLock::new(TickList { head: ptr::null_mut() }) }; MAX_TICK_RATES];

// ── Time events ─────────────────────────────────────────────────

/// A one-shot or periodic timeout, bound to a target actor and a signal.
///
/// Owned by the application (usually embedded in the actor it times);
/// referenced by the wheel while armed. The event posted on expiry is the
/// `TimeEvt` itself — no allocation happens on the tick path.
#[repr(C)]
pub struct TimeEvt {
    evt: Evt,
    next: AtomicPtr<TimeEvt>,
    ctr: AtomicU32,
    interval: AtomicU32,
    flags: AtomicU8,
    rate: u8,
    target: ActorRef,
}

// SAFETY: repr(C) with the Evt header first.
unsafe impl Payload for TimeEvt {}

impl TimeEvt {
    /// Creates a disarmed time event that will post `sig` to `target`
    /// from rate `rate`'s tick.
    ///
    /// Const so time events can be embedded in static actors.
    pub const fn new(target: ActorRef, sig: Signal, rate: u8) -> Self {
        assert!(sig >= SIG_USER, "time: reserved signal");
        assert!((rate as usize) < MAX_TICK_RATES, "time: bad tick rate");
        Self {
            evt: Evt::stat(sig),
            next: AtomicPtr::new(ptr::null_mut()),
            ctr: AtomicU32::new(0),
            interval: AtomicU32::new(0),
            flags: AtomicU8::new(0),
            rate,
            target,
        }
    }

    /// Arms the event to expire in `nticks` ticks; `interval > 0` rearms
    /// it every `interval` ticks thereafter (periodic), `interval == 0`
    /// makes it one-shot.
    ///
    /// # Panics
    /// If `nticks` is zero or the event is already armed (pending-disarm
    /// counts as disarmed and may be re-armed freely).
    ///
    /// # Safety
    /// The event must stay at its address until it is observed disarmed
    /// and unlinked — the wheel keeps a raw link to it. Time events in
    /// `static`s or inside started actors satisfy this by construction.
    pub unsafe fn arm(&self, nticks: u32, interval: u32) {
        assert!(nticks > 0, "time: zero initial ticks");
        let mut list = WHEEL[self.rate as usize].lock();
        let f = self.load_flags();
        assert!(!f.contains(TimeFlags::ARMED), "time: already armed");
        self.ctr.store(nticks, Ordering::Relaxed);
        self.interval.store(interval, Ordering::Relaxed);
        if !f.contains(TimeFlags::LINKED) {
            self.next.store(list.head, Ordering::Relaxed);
            list.head = self as *const TimeEvt as *mut TimeEvt;
            self.set_flags(TimeFlags::LINKED);
        }
        self.set_flags(TimeFlags::ARMED);
        log::trace!(
            "[time] armed sig {} for prio {}: {} ticks, interval {}",
            self.evt.sig(),
            self.target.prio(),
            nticks,
            interval
        );
    }

    /// Disarms the event. Idempotent, safe from any context; the actual
    /// unlink happens inside the next tick walk. Returns whether the
    /// event was still armed (false means the timeout already posted or
    /// was never armed).
    pub fn disarm(&self) -> bool {
        let _list = WHEEL[self.rate as usize].lock();
        let was_armed = self.load_flags().contains(TimeFlags::ARMED);
        self.clear_flags(TimeFlags::ARMED);
        if was_armed {
            log::trace!("[time] disarmed sig {}", self.evt.sig());
        }
        was_armed
    }

    /// Refreshes the down-counter to `nticks`, arming the event if it had
    /// expired or was never armed. Returns whether it was still armed —
    /// false tells a periodic-watchdog pattern that it came too late.
    pub fn rearm(&self, nticks: u32) -> bool {
        assert!(nticks > 0, "time: zero initial ticks");
        let mut list = WHEEL[self.rate as usize].lock();
        let f = self.load_flags();
        let was_armed = f.contains(TimeFlags::ARMED);
        self.ctr.store(nticks, Ordering::Relaxed);
        if !was_armed {
            if !f.contains(TimeFlags::LINKED) {
                self.next.store(list.head, Ordering::Relaxed);
                list.head = self as *const TimeEvt as *mut TimeEvt;
                self.set_flags(TimeFlags::LINKED);
            }
            self.set_flags(TimeFlags::ARMED);
        }
        was_armed
    }

    /// Current down-counter; 0 when disarmed or expired.
    pub fn ctr(&self) -> u32 {
        self.ctr.load(Ordering::Relaxed)
    }

    /// True while armed (counting down).
    pub fn is_armed(&self) -> bool {
        self.load_flags().contains(TimeFlags::ARMED)
    }

    fn load_flags(&self) -> TimeFlags {
        TimeFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    fn set_flags(&self, f: TimeFlags) {
        self.flags.fetch_or(f.bits(), Ordering::Relaxed);
    }

    fn clear_flags(&self, f: TimeFlags) {
        self.flags.fetch_and(!f.bits(), Ordering::Relaxed);
    }
}

// ── The tick ────────────────────────────────────────────────────

/// Advances rate `rate` by one tick: walks the rate's list, posting every
/// expiring time event to its target (list-head-first), reloading periodic
/// ones and excising one-shots and pending-disarms.
///
/// Call once per period from the rate's tick interrupt (or a ticker
/// thread on a hosted port — the ISR bracketing is internal, so expiry
/// posts never dispatch re-entrantly; they run when the tick unwinds).
pub fn tick(rate: u8) {
    assert!((rate as usize) < MAX_TICK_RATES, "time: bad tick rate");
    sched::isr_enter();
    {
        let mut guard = WHEEL[rate as usize].lock();
        let list = &mut *guard;
        let mut prev: *mut TimeEvt = ptr::null_mut();
        let mut cur = list.head;
        while !cur.is_null() {
            // SAFETY: linked events are pinned per the `arm` contract.
            let te = unsafe { &*cur };
            let next = te.next.load(Ordering::Relaxed);
            if !te.load_flags().contains(TimeFlags::ARMED) {
                // Pending-disarm: excise, keep `prev` where it is.
                excise(list, prev, next);
                te.clear_flags(TimeFlags::LINKED);
            } else {
                let c = te.ctr.load(Ordering::Relaxed) - 1;
                te.ctr.store(c, Ordering::Relaxed);
                if c == 0 {
                    let interval = te.interval.load(Ordering::Relaxed);
                    if interval > 0 {
                        te.ctr.store(interval, Ordering::Relaxed);
                        prev = cur;
                    } else {
                        // One-shot: disarm and excise before posting so a
                        // handler may immediately re-arm.
                        te.clear_flags(TimeFlags::ARMED | TimeFlags::LINKED);
                        excise(list, prev, next);
                    }
                    log::trace!(
                        "[time] sig {} expired -> prio {}",
                        te.evt.sig(),
                        te.target.prio()
                    );
                    te.target.post(&te.evt, NO_MARGIN, None);
                } else {
                    prev = cur;
                }
            }
            cur = next;
        }
    }
    sched::isr_exit();
}

/// Removes the node after `prev` (or the head when `prev` is null),
/// relinking to `next`.
fn excise(list: &mut TickList, prev: *mut TimeEvt, next: *mut TimeEvt) {
    if prev.is_null() {
        list.head = next;
    } else {
        // SAFETY: `prev` is a linked, pinned time event.
        unsafe { (*prev).next.store(next, Ordering::Relaxed) };
    }
}

/// Empties every rate list so each test starts with a quiet wheel.
#[cfg(test)]
pub(crate) fn reset() {
    for rate in &WHEEL {
        rate.lock().head = ptr::null_mut();
    }
}
