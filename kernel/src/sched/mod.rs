//! The preemptive priority scheduler.
//!
//! A fixed-priority, run-to-completion scheduler over actors on a single
//! stack. Exactly one actor runs at any instant; a higher-priority actor
//! becoming ready preempts *between* run-to-completion steps, never inside
//! one. Readiness is a [`PrioSet`] bit per actor; the registry maps each
//! priority to its started actor.
//!
//! Two execution domains interact:
//! - **thread context**: `main`, actor handlers. Posting here may call
//!   [`schedule`] directly.
//! - **ISR context**: bracketed by [`isr_enter`]/[`isr_exit`]. Posting here
//!   only marks ready bits; the final `isr_exit` runs the scheduler.
//!
//! The scheduler lock is never held across a dispatch — handlers run with
//! all kernel locks free, the same discipline the underlying platform uses
//! around its context switches.

mod mutex;
mod prio_set;

pub use mutex::{CeilingGuard, CeilingMutex};
pub use prio_set::PrioSet;

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::actor::AnyActor;
use crate::sync::SpinLock;
use crate::MAX_ACTIVE;

// ── Scheduler state ─────────────────────────────────────────────

struct SchedCore {
    /// Priorities with a non-empty queue.
    ready: PrioSet,
    /// Priority of the actor currently executing a RTC step (0 = none).
    active: u8,
    /// Scheduling ceiling: actors at or below it do not run. Starts at the
    /// maximum so nothing dispatches until startup completes; the ceiling
    /// mutex raises it temporarily at run time.
    ceiling: u8,
    /// Started actors, indexed by priority.
    registry: [Option<NonNull<dyn AnyActor>>; MAX_ACTIVE + 1],
}

// SAFETY: registry pointers are only dereferenced by the scheduler, which
// serializes all actor access; see `schedule`.
unsafe impl Send for SchedCore {}

static SCHED: SpinLock<SchedCore> = SpinLock::new(SchedCore {
    ready: PrioSet::new(),
    active: 0,
    ceiling: MAX_ACTIVE as u8,
    registry: [None; MAX_ACTIVE + 1],
});

/// ISR nesting depth. Incremented by the integrator on every interrupt
/// entry, decremented on exit; the kernel reads it to tell contexts apart.
static ISR_NEST: AtomicUsize = AtomicUsize::new(0);

// ── Context tracking ────────────────────────────────────────────

/// Marks entry into interrupt context. Call first thing in every ISR that
/// may post, publish, or tick.
#[inline]
pub fn isr_enter() {
    ISR_NEST.fetch_add(1, Ordering::Relaxed);
}

/// Marks exit from interrupt context. When the outermost interrupt
/// finishes, the scheduler runs to dispatch whatever the ISR made ready.
#[inline]
pub fn isr_exit() {
    let prev = ISR_NEST.fetch_sub(1, Ordering::Release);
    assert!(prev > 0, "sched: isr_exit without isr_enter");
    if prev == 1 {
        schedule();
    }
}

/// True while executing in interrupt context.
#[inline]
pub fn in_isr() -> bool {
    ISR_NEST.load(Ordering::Relaxed) > 0
}

// ── Registry ────────────────────────────────────────────────────

pub(crate) fn register(prio: u8, actor: NonNull<dyn AnyActor>) {
    assert!(
        prio >= 1 && prio as usize <= MAX_ACTIVE,
        "sched: priority {} out of range",
        prio
    );
    let mut s = SCHED.lock();
    assert!(
        s.registry[prio as usize].is_none(),
        "sched: priority {} already in use",
        prio
    );
    s.registry[prio as usize] = Some(actor);
}

pub(crate) fn unregister(prio: u8) {
    let mut s = SCHED.lock();
    assert!(
        s.registry[prio as usize].is_some(),
        "sched: priority {} not registered",
        prio
    );
    s.registry[prio as usize] = None;
    s.ready.remove(prio);
}

/// The actor registered at `prio`.
///
/// # Panics
/// If no actor is started at that priority.
pub(crate) fn lookup(prio: u8) -> NonNull<dyn AnyActor> {
    assert!(
        prio >= 1 && prio as usize <= MAX_ACTIVE,
        "sched: priority {} out of range",
        prio
    );
    SCHED.lock().registry[prio as usize]
        .unwrap_or_else(|| panic!("sched: no actor at priority {}", prio))
}

/// Marks `prio` ready (its queue went empty → occupied).
pub(crate) fn note_ready(prio: u8) {
    SCHED.lock().ready.insert(prio);
}

// ── The activate loop ───────────────────────────────────────────

/// Runs ready actors, highest priority first, until nothing above the
/// current activation level remains.
///
/// Each iteration dispatches exactly one event (one RTC step) with no
/// kernel lock held. Re-entrant calls — a handler posting to a
/// higher-priority actor lands here again — nest at most once per
/// priority level, which is how single-stack preemption is realized.
///
/// Callable from thread context only; ISRs mark ready bits and let
/// [`isr_exit`] do this on their behalf.
pub fn schedule() {
    loop {
        let (prio, actor, prev_active) = {
            let mut s = SCHED.lock();
            let p = s.ready.find_max();
            if p == 0 || p <= s.active.max(s.ceiling) {
                return;
            }
            let actor = s.registry[p as usize]
                .unwrap_or_else(|| panic!("sched: ready bit for empty slot {}", p));
            let prev = s.active;
            s.active = p;
            (p, actor, prev)
        };

        if prev_active != 0 {
            log::trace!("[sched] {} preempts {}", prio, prev_active);
        }

        // SAFETY: the `active` marker guarantees this priority is not
        // already running a step (re-entrant `schedule` calls skip
        // priorities at or below the active one), and `start` keeps the
        // actor registered and pinned for the kernel's lifetime.
        let progressed = unsafe { (*actor.as_ptr()).rtc_step() };

        {
            let mut s = SCHED.lock();
            // SAFETY: shared access to the queue is interior-mutable and
            // lock-protected.
            let drained = !progressed || unsafe { actor.as_ref() }.base_dyn().queue_is_empty();
            if drained {
                s.ready.remove(prio);
            }
            s.active = prev_active;
        }
    }
}

/// Opens the scheduler after startup: drops the boot-time ceiling so
/// actors can run, then dispatches everything made ready during
/// initialization.
pub(crate) fn unlock_startup() {
    SCHED.lock().ceiling = 0;
    schedule();
}

// ── Ceiling plumbing (for sched::mutex) ─────────────────────────

/// Raises the scheduling ceiling to at least `ceiling`; returns the
/// previous value for the matching restore.
pub(crate) fn raise_ceiling(ceiling: u8) -> u8 {
    let mut s = SCHED.lock();
    let prev = s.ceiling;
    if ceiling > prev {
        s.ceiling = ceiling;
    }
    prev
}

/// Restores the ceiling saved by [`raise_ceiling`] and lets anything that
/// became ready inside the region run.
pub(crate) fn restore_ceiling(prev: u8) {
    SCHED.lock().ceiling = prev;
    schedule();
}

// ── Board support ───────────────────────────────────────────────

/// The integrator-supplied hooks of the final loop. The assertion hook of
/// the platform contract is the `#[panic_handler]`, not a method here — a
/// library must leave it to the application.
pub trait Bsp {
    /// Runs once before the scheduler opens.
    fn on_startup(&self) {}
    /// Runs on orderly shutdown paths the application defines.
    fn on_cleanup(&self) {}
    /// Runs whenever no actor is ready; the place for power management,
    /// watchdog petting, or a hosted sleep.
    fn on_idle(&self) {}
    /// The periodic tick hook: wire the board's timer to call this, and
    /// advance the rate-0 wheel from it.
    fn on_clock_tick(&self) {
        crate::time::tick(0);
    }
}

/// The final loop: opens the scheduler and alternates dispatching with
/// the idle hook, forever.
pub fn run<B: Bsp>(bsp: &B) -> ! {
    bsp.on_startup();
    log::info!("[sched] scheduler open, entering final loop");
    unlock_startup();
    loop {
        schedule();
        bsp.on_idle();
    }
}

// ── Test support ────────────────────────────────────────────────

/// Rewinds the scheduler to its boot state so each test starts clean.
#[cfg(test)]
pub(crate) fn reset() {
    let mut s = SCHED.lock();
    s.ready = PrioSet::new();
    s.active = 0;
    s.ceiling = MAX_ACTIVE as u8;
    s.registry = [None; MAX_ACTIVE + 1];
    drop(s);
    ISR_NEST.store(0, Ordering::Relaxed);
}
