//! Actors — the unit of concurrency.
//!
//! An actor binds a hierarchical state machine, a private event queue, and
//! a unique priority. All application logic lives in the state machine;
//! the actor layer supplies the mailbox plumbing: posting (direct, urgent,
//! or published), starting and stopping, and the defer/recall escrow.
//!
//! Application actors embed the two kernel bases and implement two traits:
//!
//! ```ignore
//! struct Philo {
//!     core: HsmCore<Self>,
//!     base: ActorBase,
//!     timer: TimeEvt,
//! }
//!
//! impl Hsm for Philo {
//!     fn core(&self) -> &HsmCore<Self> { &self.core }
//!     fn initial(&mut self, _e: Option<&Evt>) -> Action<Self> {
//!         Action::Tran(Self::thinking)
//!     }
//! }
//!
//! impl Actor for Philo {
//!     fn base(&self) -> &ActorBase { &self.base }
//! }
//! ```
//!
//! Other parties address an actor through its [`ActorRef`] — a copyable
//! handle carrying the priority, valid wherever the actor is started.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::evt::Evt;
use crate::hsm::Hsm;
use crate::memory::dynamic;
use crate::queue::{EvtQueue, EvtSlot, Post};
use crate::sched;
use crate::MAX_ACTIVE;

// ── Actor base ──────────────────────────────────────────────────

/// Kernel-owned part of every actor: priority and event queue.
///
/// Embed one per actor; all fields are interior-mutable so the base can be
/// reached through the shared references the registry hands out.
pub struct ActorBase {
    prio: AtomicU8,
    queue: EvtQueue,
}

impl ActorBase {
    /// Const so actors can live in statics. The priority is assigned by
    /// [`Actor::start`].
    pub const fn new() -> Self {
        Self {
            prio: AtomicU8::new(0),
            queue: EvtQueue::new(),
        }
    }

    /// The actor's priority; 0 before start and after stop.
    #[inline]
    pub fn prio(&self) -> u8 {
        self.prio.load(Ordering::Relaxed)
    }

    /// Handle to this actor, for posting and subscriptions.
    ///
    /// # Panics
    /// If the actor has not been started.
    pub fn actor_ref(&self) -> ActorRef {
        let p = self.prio();
        assert!(p != 0, "actor: not started");
        ActorRef::new(p)
    }

    /// Queue usage snapshot (headroom diagnostics).
    pub fn queue_stats(&self) -> crate::queue::QueueStats {
        self.queue.stats()
    }

    pub(crate) fn queue(&self) -> &EvtQueue {
        &self.queue
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for ActorBase {
    fn default() -> Self {
        Self::new()
    }
}

// ── Object-safe facade for the registry ─────────────────────────

/// What the scheduler needs from an actor, type-erased.
pub(crate) trait AnyActor {
    /// Runs one run-to-completion step: pop one event, dispatch it to the
    /// state machine, garbage-collect. False when the queue was empty.
    fn rtc_step(&mut self) -> bool;

    /// The actor's kernel base.
    fn base_dyn(&self) -> &ActorBase;
}

impl<T: Actor> AnyActor for T {
    fn rtc_step(&mut self) -> bool {
        match self.base().queue().get() {
            Some(ptr) => {
                // SAFETY: the queue held a reference for us; the event
                // stays alive until the matching gc below.
                let e = unsafe { ptr.as_ref() };
                self.dispatch(e);
                dynamic::gc(e);
                true
            }
            None => false,
        }
    }

    fn base_dyn(&self) -> &ActorBase {
        self.base()
    }
}

// ── The actor trait ─────────────────────────────────────────────

/// An active object: a state machine with a mailbox and a priority.
pub trait Actor: Hsm + 'static {
    /// Access to the embedded kernel base.
    fn base(&self) -> &ActorBase;

    /// Starts the actor: installs the queue storage, claims `prio` in the
    /// scheduler registry, and runs the top-most initial transition (with
    /// `init_evt` as its optional parameter).
    ///
    /// The actor is eligible to receive events from the moment this
    /// returns; nothing dispatches until the scheduler opens.
    ///
    /// # Panics
    /// If `prio` is outside `1..=`[`MAX_ACTIVE`] or already claimed, or
    /// the actor was already started.
    fn start(
        &'static mut self,
        prio: u8,
        queue_sto: &'static mut [EvtSlot],
        init_evt: Option<&Evt>,
    ) {
        assert!(
            prio >= 1 && prio as usize <= MAX_ACTIVE,
            "actor: priority {} out of range",
            prio
        );
        assert!(self.base().prio() == 0, "actor: already started");
        self.base().queue().init(queue_sto);
        self.base().prio.store(prio, Ordering::Relaxed);

        // Register before the initial transition: it may already subscribe
        // or post to self.
        //
        // SAFETY: `self` is 'static and stays registered (hence reachable
        // by the scheduler) until `stop`, which removes the entry.
        let node: NonNull<dyn AnyActor> = NonNull::from(&mut *self as &mut dyn AnyActor);
        sched::register(prio, node);

        self.init(init_evt);
        log::info!("[actor] started at priority {}", prio);
    }

    /// Stops the actor: unsubscribes it everywhere, drains its queue
    /// through the garbage collector, and frees its registry slot.
    fn stop(&mut self) {
        let prio = self.base().prio();
        assert!(prio != 0, "actor: not started");
        crate::pubsub::unsubscribe_all(ActorRef::new(prio));
        while let Some(ptr) = self.base().queue().get() {
            // SAFETY: the queue's reference is the one we surrender.
            dynamic::gc(unsafe { ptr.as_ref() });
        }
        sched::unregister(prio);
        self.base().prio.store(0, Ordering::Relaxed);
        log::info!("[actor] stopped, priority {} freed", prio);
    }
}

// ── Actor handles ───────────────────────────────────────────────

/// A copyable handle to a started actor, addressed by priority.
///
/// Priorities are assigned by design (they *are* the system's scheduling
/// policy), so handles are typically `const`-constructed next to the
/// priority map of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorRef {
    prio: u8,
}

impl ActorRef {
    /// Handle for the actor at `prio`.
    pub const fn new(prio: u8) -> Self {
        Self { prio }
    }

    /// The priority this handle addresses.
    #[inline]
    pub fn prio(&self) -> u8 {
        self.prio
    }

    /// Posts `e` FIFO to this actor's queue.
    ///
    /// On success one reference is taken for dynamic events and the
    /// scheduler is nudged (directly in thread context, via the ready set
    /// in ISR context). With `margin == `[`crate::NO_MARGIN`] a full queue
    /// is fatal; otherwise `false` is returned and the event is untouched.
    ///
    /// Events must be static or pool-allocated: the queue keeps only a
    /// reference.
    ///
    /// `sender` is observability only.
    pub fn post(&self, e: &Evt, margin: u16, sender: Option<ActorRef>) -> bool {
        let actor = sched::lookup(self.prio);
        // SAFETY: registry entries stay valid while started; the base is
        // interior-mutable and safe to reach through a shared reference.
        let base = unsafe { actor.as_ref() }.base_dyn();
        match base.queue().post(e, margin) {
            Post::Stored { was_empty } => {
                log::trace!(
                    "[actor] sig {} -> prio {} (from {:?})",
                    e.sig(),
                    self.prio,
                    sender.map(|s| s.prio)
                );
                if was_empty {
                    sched::note_ready(self.prio);
                }
                if !sched::in_isr() {
                    sched::schedule();
                }
                true
            }
            Post::Refused => {
                log::warn!(
                    "[actor] queue full: sig {} -> prio {} refused (margin {})",
                    e.sig(),
                    self.prio,
                    margin
                );
                false
            }
        }
    }

    /// Posts `e` LIFO: it will be dispatched before anything already in
    /// the queue. For urgent self-directed events; overflow is fatal.
    pub fn post_lifo(&self, e: &Evt) {
        let actor = sched::lookup(self.prio);
        // SAFETY: as in `post`.
        let base = unsafe { actor.as_ref() }.base_dyn();
        if base.queue().post_lifo(e) {
            sched::note_ready(self.prio);
        }
        if !sched::in_isr() {
            sched::schedule();
        }
    }

    /// Recalls one deferred event from `store`: LIFO-posts it to this
    /// actor (so it is processed before anything already queued) and
    /// surrenders the store's reference. False when the store was empty.
    pub fn recall(&self, store: &EvtQueue) -> bool {
        match store.get() {
            Some(ptr) => {
                // SAFETY: the store held a reference; the event is alive.
                let e = unsafe { ptr.as_ref() };
                self.post_lifo(e);
                // The LIFO post above took its own reference, so the
                // store's reference can be dropped without a recycle
                // check — the event is provably still held by our queue.
                dynamic::ref_dec_pinned(e);
                log::trace!("[actor] recalled sig {} to prio {}", e.sig(), self.prio);
                true
            }
            None => false,
        }
    }
}

/// Defers `e` into an escrow queue for later [`ActorRef::recall`].
///
/// Posts FIFO with a fresh reference, so the current receive lifetime may
/// end freely. With `margin == `[`crate::NO_MARGIN`] a full store is
/// fatal; a positive margin returns `false` and leaves everything
/// untouched (size the store for the worst case you intend to survive).
pub fn defer(store: &EvtQueue, e: &Evt, margin: u16) -> bool {
    matches!(store.post(e, margin), Post::Stored { .. })
}
