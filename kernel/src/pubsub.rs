//! Publish–subscribe — signal-indexed event routing.
//!
//! The subscriber table maps every publishable signal to the set of
//! priorities subscribed to it. Publishing walks that set from the highest
//! priority down, posting to each subscriber; an event may therefore be
//! dispatched zero or more times from one publish, and the reference
//! counting guarantees it is reclaimed exactly once regardless.

use spin::Mutex;

use crate::actor::ActorRef;
use crate::evt::{Evt, SIG_USER, Signal};
use crate::memory::dynamic;
use crate::sched::PrioSet;

/// Subscriber table: one priority set per signal, over storage the
/// application sizes for its highest published signal.
struct SubTable {
    rows: Option<&'static mut [PrioSet]>,
}

static SUBS: Mutex<SubTable> = Mutex::new(SubTable { rows: None });

/// Installs the subscriber storage: one row per signal in
/// `0..storage.len()`. Signals at and above `storage.len()` cannot be
/// published. Call once at startup, before any subscription.
pub fn init(storage: &'static mut [PrioSet]) {
    let mut t = SUBS.lock();
    assert!(t.rows.is_none(), "pubsub: already initialized");
    assert!(storage.len() > SIG_USER as usize, "pubsub: table too small");
    storage.fill(PrioSet::new());
    log::info!("[pubsub] table ready for {} signals", storage.len());
    t.rows = Some(storage);
}

/// One past the highest publishable signal.
pub fn max_signal() -> Signal {
    SUBS.lock().rows.as_ref().map_or(0, |r| r.len()) as Signal
}

/// Subscribes `actor` to `sig`. Idempotent.
///
/// # Panics
/// If `sig` is reserved or outside the installed table.
pub fn subscribe(actor: ActorRef, sig: Signal) {
    let mut t = SUBS.lock();
    let rows = t.rows.as_mut().expect("pubsub: not initialized");
    assert!(sig >= SIG_USER, "pubsub: reserved signal {}", sig);
    assert!((sig as usize) < rows.len(), "pubsub: signal {} out of table", sig);
    rows[sig as usize].insert(actor.prio());
    log::trace!("[pubsub] prio {} subscribed to sig {}", actor.prio(), sig);
}

/// Unsubscribes `actor` from `sig`. Idempotent.
pub fn unsubscribe(actor: ActorRef, sig: Signal) {
    let mut t = SUBS.lock();
    let rows = t.rows.as_mut().expect("pubsub: not initialized");
    assert!(sig >= SIG_USER, "pubsub: reserved signal {}", sig);
    assert!((sig as usize) < rows.len(), "pubsub: signal {} out of table", sig);
    rows[sig as usize].remove(actor.prio());
}

/// Removes `actor` from every row (part of an orderly stop).
pub fn unsubscribe_all(actor: ActorRef) {
    let mut t = SUBS.lock();
    if let Some(rows) = t.rows.as_mut() {
        for row in rows.iter_mut() {
            row.remove(actor.prio());
        }
    }
}

/// Publishes `e` to every subscriber of `e.sig()`, highest priority
/// first.
///
/// The event is pinned (one extra reference) across the fan-out and
/// garbage-collected afterwards, so publishing to zero subscribers
/// reclaims a dynamic event immediately, and a failed margin-honoring
/// post to one subscriber (logged, skipped) leaves the others and the
/// reference count unaffected. With `margin == `[`crate::NO_MARGIN`] a
/// full subscriber queue is fatal.
pub fn publish(e: &Evt, margin: u16, sender: Option<ActorRef>) {
    let row: PrioSet = {
        let t = SUBS.lock();
        let rows = t.rows.as_ref().expect("pubsub: not initialized");
        assert!(
            (e.sig() as usize) < rows.len(),
            "pubsub: signal {} out of table",
            e.sig()
        );
        rows[e.sig() as usize]
    };

    // Pin the event so it cannot be recycled mid-fan-out by an eager
    // subscriber running at a higher priority.
    if e.is_dynamic() {
        e.ref_inc();
    }

    log::trace!("[pubsub] publishing sig {} (from {:?})", e.sig(), sender.map(|s| s.prio()));
    let mut set = row;
    loop {
        let p = set.find_max();
        if p == 0 {
            break;
        }
        set.remove(p);
        ActorRef::new(p).post(e, margin, sender);
    }

    // Drop the pin; recycles the event when nobody took it.
    dynamic::gc(e);
}

/// Clears the table installation so each test starts clean.
#[cfg(test)]
pub(crate) fn reset() {
    SUBS.lock().rows = None;
}
