//! Event queues — per-actor mailboxes and deferral stores.
//!
//! An [`EvtQueue`] is a fixed-capacity ring of event references plus a
//! dedicated *front* slot. The front slot doubles as the not-empty
//! indicator: the queue is empty exactly when the front slot is. A queue
//! over a ring of `N` slots therefore holds up to `N + 1` events.
//!
//! Queues support FIFO posting with a margin policy, LIFO posting for
//! urgent self-directed events, and single-consumer extraction. A
//! low-watermark of free slots is tracked so applications can measure the
//! headroom their worst case actually left.

use core::ptr::NonNull;

use crate::evt::Evt;
use crate::sync::SpinLock;
use crate::NO_MARGIN;

// ── Storage slot ────────────────────────────────────────────────

/// One slot of application-supplied queue storage.
///
/// Applications declare queue storage as arrays of `EvtSlot` and hand them
/// to [`EvtQueue::init`]; the content is opaque.
#[derive(Clone, Copy)]
pub struct EvtSlot(Option<NonNull<Evt>>);

impl EvtSlot {
    /// An empty slot, for array initialization.
    pub const fn empty() -> Self {
        Self(None)
    }
}

// ── Outcome of a post ───────────────────────────────────────────

/// What a FIFO post did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Post {
    /// Event stored; `was_empty` says whether the queue transitioned from
    /// empty to occupied (the owner may need a scheduler nudge).
    Stored { was_empty: bool },
    /// Margin not met; the queue and the event are untouched.
    Refused,
}

// ── Queue ───────────────────────────────────────────────────────

/// Snapshot of a queue's usage statistics.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    /// Maximum number of events the queue can hold (ring + front).
    pub capacity: u16,
    /// Free slots right now.
    pub free: u16,
    /// Low-watermark of `free` since initialization.
    pub min_free: u16,
}

struct QueueCore {
    /// Ring storage; `None` until `init`.
    ring: Option<&'static mut [EvtSlot]>,
    /// The front slot — also the not-empty indicator.
    front: Option<NonNull<Evt>>,
    /// Ring insertion index (FIFO enqueue).
    head: u16,
    /// Ring extraction index.
    tail: u16,
    /// Free slots; `ring.len() + 1` when the queue is empty.
    n_free: u16,
    /// Low-watermark of `n_free`.
    n_min: u16,
}

// SAFETY: raw event pointers are only stored and returned, never
// dereferenced by the queue; all index state is guarded by the lock.
unsafe impl Send for QueueCore {}

/// A single-consumer event queue with FIFO posting and LIFO urgency.
///
/// Any context may post (the queue serializes internally); only the owner
/// extracts. Events are stored by reference: dynamic events get one
/// reference taken per successful post, static events are stored as-is.
pub struct EvtQueue {
    core: SpinLock<QueueCore>,
}

impl EvtQueue {
    /// Creates an uninitialized queue. Const so queues can live in statics;
    /// call [`init`](EvtQueue::init) before first use.
    pub const fn new() -> Self {
        Self {
            core: SpinLock::new(QueueCore {
                ring: None,
                front: None,
                head: 0,
                tail: 0,
                n_free: 0,
                n_min: 0,
            }),
        }
    }

    /// Installs the ring storage. The queue can then hold
    /// `storage.len() + 1` events.
    ///
    /// # Panics
    /// If the queue was already initialized.
    pub fn init(&self, storage: &'static mut [EvtSlot]) {
        let mut q = self.core.lock();
        assert!(q.ring.is_none(), "queue: already initialized");
        assert!(storage.len() < u16::MAX as usize, "queue: ring too long");
        let free = storage.len() as u16 + 1;
        q.ring = Some(storage);
        q.n_free = free;
        q.n_min = free;
    }

    /// FIFO post.
    ///
    /// Succeeds while more than `margin` slots are free. On success one
    /// reference is taken for dynamic events. With `margin == NO_MARGIN`
    /// a full queue is a fatal error; otherwise the queue and the event
    /// are left untouched and [`Post::Refused`] is returned.
    pub(crate) fn post(&self, e: &Evt, margin: u16) -> Post {
        let mut guard = self.core.lock();
        let q = &mut *guard;
        if q.n_free > margin {
            if e.is_dynamic() {
                e.ref_inc();
            }
            let was_empty = q.front.is_none();
            let ptr = NonNull::from(e);
            if was_empty {
                q.front = Some(ptr);
            } else {
                let ring = q.ring.as_mut().expect("queue: not initialized");
                ring[q.head as usize].0 = Some(ptr);
                q.head = (q.head + 1) % ring.len() as u16;
            }
            q.n_free -= 1;
            if q.n_free < q.n_min {
                q.n_min = q.n_free;
            }
            Post::Stored { was_empty }
        } else {
            assert!(margin != NO_MARGIN, "queue: full with no margin");
            Post::Refused
        }
    }

    /// LIFO post — the event is delivered before anything already queued.
    ///
    /// Reserved for urgent self-directed events; overflow is always fatal
    /// because an urgent event has nowhere else to go.
    pub(crate) fn post_lifo(&self, e: &Evt) -> bool {
        let mut guard = self.core.lock();
        let q = &mut *guard;
        assert!(q.n_free > 0, "queue: full with no margin");
        if e.is_dynamic() {
            e.ref_inc();
        }
        let was_empty = q.front.is_none();
        let ptr = NonNull::from(e);
        if let Some(old_front) = q.front.replace(ptr) {
            // The displaced front becomes the next extraction: back the
            // tail up one slot and park it there.
            let ring = q.ring.as_mut().expect("queue: not initialized");
            let tail = (q.tail as usize + ring.len() - 1) % ring.len();
            ring[tail].0 = Some(old_front);
            q.tail = tail as u16;
        }
        q.n_free -= 1;
        if q.n_free < q.n_min {
            q.n_min = q.n_free;
        }
        was_empty
    }

    /// Extracts the next event, refilling the front slot from the ring.
    ///
    /// Single consumer: called only by the owning actor's dispatch loop
    /// (or by recall on a deferral store).
    pub(crate) fn get(&self) -> Option<NonNull<Evt>> {
        let mut guard = self.core.lock();
        let q = &mut *guard;
        let e = q.front.take()?;
        let capacity = q.ring.as_ref().map_or(0, |r| r.len()) as u16 + 1;
        let in_ring = capacity - q.n_free - 1;
        if in_ring > 0 {
            let ring = q.ring.as_mut().expect("queue: not initialized");
            q.front = ring[q.tail as usize].0.take();
            debug_assert!(q.front.is_some(), "queue: ring slot empty");
            q.tail = (q.tail + 1) % ring.len() as u16;
        }
        q.n_free += 1;
        Some(e)
    }

    /// True when no event is stored.
    pub fn is_empty(&self) -> bool {
        self.core.lock().front.is_none()
    }

    /// Usage snapshot.
    pub fn stats(&self) -> QueueStats {
        let q = self.core.lock();
        QueueStats {
            capacity: q.ring.as_ref().map_or(0, |r| r.len()) as u16 + 1,
            free: q.n_free,
            min_free: q.n_min,
        }
    }
}

impl Default for EvtQueue {
    fn default() -> Self {
        Self::new()
    }
}
