//! Dining philosophers — the classic concurrency exercise on actors.
//!
//! Five philosophers alternate thinking and eating; the table arbitrates
//! forks so neighbors never eat at once and nobody starves. Philosophers
//! never talk to each other: hunger goes straight to the table, grants
//! and completions travel by publish/subscribe.

mod bsp;
mod philo;
mod table;

use pulsar_kernel::evt::{SIG_USER, Signal};
use pulsar_kernel::memory::pool;
use pulsar_kernel::queue::EvtSlot;
use pulsar_kernel::sched::PrioSet;
use pulsar_kernel::{Actor, Evt, Payload, pubsub};

/// Number of philosophers (and forks).
pub const N_PHILO: usize = 5;

// ── Signals ─────────────────────────────────────────────────────

/// Published by the table: the named philosopher may eat.
pub const EAT_SIG: Signal = SIG_USER;
/// Published by a philosopher: done eating, forks are coming back.
pub const DONE_SIG: Signal = SIG_USER + 1;
/// Posted directly to the table: the named philosopher wants forks.
pub const HUNGRY_SIG: Signal = SIG_USER + 2;
/// Posted by a philosopher's own time event.
pub const TIMEOUT_SIG: Signal = SIG_USER + 3;

/// One past the highest published signal (sizes the subscriber table).
const MAX_PUB_SIG: usize = DONE_SIG as usize + 1;

// ── Events ──────────────────────────────────────────────────────

/// Event payload naming a philosopher; used by EAT, DONE and HUNGRY.
#[repr(C)]
pub struct TableEvt {
    base: Evt,
    pub philo: u8,
}

// SAFETY: repr(C) with the Evt header first.
unsafe impl Payload for TableEvt {}

impl TableEvt {
    /// Allocates a table event from the event pool.
    pub fn new(sig: Signal, philo: u8) -> &'static mut Self {
        pulsar_kernel::memory::dynamic::new(Self {
            base: Evt::stat(sig),
            philo,
        })
    }
}

// ── Priorities ──────────────────────────────────────────────────
//
// Philosopher n runs at priority n+1; the table outranks them all so a
// hunger notice is arbitrated before the next philosopher stirs.

pub const fn philo_prio(n: usize) -> u8 {
    n as u8 + 1
}

pub const TABLE_PRIO: u8 = N_PHILO as u8 + 1;

// ── Startup ─────────────────────────────────────────────────────

fn leak<T>(v: T) -> &'static mut T {
    Box::leak(Box::new(v))
}

fn qsto(ring: usize) -> &'static mut [EvtSlot] {
    Box::leak(vec![EvtSlot::empty(); ring].into_boxed_slice())
}

fn main() {
    bsp::init_logging();
    bsp::seed(1234);

    log::info!("dpp: Pulsar {} demo, {} philosophers", pulsar_kernel::VERSION, N_PHILO);

    // One pool sized for the table events in flight: each philosopher can
    // contribute a HUNGRY plus a fan-out EAT/DONE at the same time.
    pool::init(
        Box::leak(vec![0u8; 4 * N_PHILO * size_of::<TableEvt>()].into_boxed_slice()),
        size_of::<TableEvt>(),
    );

    // Subscriber table for the published signals.
    pubsub::init(Box::leak(vec![PrioSet::new(); MAX_PUB_SIG].into_boxed_slice()));

    for n in 0..N_PHILO {
        leak(philo::Philo::new(n as u8)).start(philo_prio(n), qsto(8), None);
    }
    leak(table::Table::new()).start(TABLE_PRIO, qsto(2 * N_PHILO), None);

    pulsar_kernel::run(&bsp::DppBsp);
}
