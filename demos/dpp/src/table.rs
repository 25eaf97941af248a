//! The table: fork arbitration.
//!
//! Forks live between neighboring philosophers. A philosopher may eat
//! only while holding both adjacent forks; the table grants them
//! first-come, remembers who is waiting, and re-arbitrates whenever a
//! meal ends. Neighbors therefore never eat simultaneously and every
//! hungry philosopher eats eventually (the waiting flag survives until
//! both forks free up).

use pulsar_kernel::actor::{Actor, ActorBase, ActorRef};
use pulsar_kernel::evt::Evt;
use pulsar_kernel::hsm::{Action, Hsm, HsmCore, top};
use pulsar_kernel::{NO_MARGIN, Payload, pubsub};

use crate::{DONE_SIG, EAT_SIG, HUNGRY_SIG, N_PHILO, TABLE_PRIO, TableEvt};

pub struct Table {
    core: HsmCore<Self>,
    base: ActorBase,
    /// fork[n] sits between philosopher n and philosopher (n+1) % N.
    fork_free: [bool; N_PHILO],
    waiting: [bool; N_PHILO],
}

const fn left(n: usize) -> usize {
    (n + 1) % N_PHILO
}

const fn right(n: usize) -> usize {
    n
}

impl Table {
    pub fn new() -> Self {
        Self {
            core: HsmCore::new(),
            base: ActorBase::new(),
            fork_free: [true; N_PHILO],
            waiting: [false; N_PHILO],
        }
    }

    fn both_free(&self, n: usize) -> bool {
        self.fork_free[left(n)] && self.fork_free[right(n)]
    }

    fn grant(&mut self, n: usize) {
        self.fork_free[left(n)] = false;
        self.fork_free[right(n)] = false;
        self.waiting[n] = false;
        let eat = TableEvt::new(EAT_SIG, n as u8);
        pubsub::publish(eat.evt(), NO_MARGIN, Some(ActorRef::new(TABLE_PRIO)));
    }

    // ── States ──────────────────────────────────────────────────

    fn serving(me: &mut Self, e: &Evt) -> Action<Self> {
        match e.sig() {
            HUNGRY_SIG => {
                // SAFETY: HUNGRY events are always TableEvt.
                let n = unsafe { e.downcast::<TableEvt>() }.philo as usize;
                assert!(n < N_PHILO, "table: bad philosopher id {}", n);
                if me.both_free(n) {
                    me.grant(n);
                } else {
                    me.waiting[n] = true;
                }
                Action::Handled
            }
            DONE_SIG => {
                // SAFETY: DONE events are always TableEvt.
                let n = unsafe { e.downcast::<TableEvt>() }.philo as usize;
                assert!(n < N_PHILO, "table: bad philosopher id {}", n);
                me.fork_free[left(n)] = true;
                me.fork_free[right(n)] = true;

                // Both neighbors may have been blocked on these forks.
                for peer in [(n + N_PHILO - 1) % N_PHILO, left(n)] {
                    if me.waiting[peer] && me.both_free(peer) {
                        me.grant(peer);
                    }
                }
                Action::Handled
            }
            _ => Action::Super(top),
        }
    }
}

impl Hsm for Table {
    fn core(&self) -> &HsmCore<Self> {
        &self.core
    }

    fn initial(&mut self, _e: Option<&Evt>) -> Action<Self> {
        pubsub::subscribe(ActorRef::new(TABLE_PRIO), DONE_SIG);
        Action::Tran(Self::serving)
    }
}

impl Actor for Table {
    fn base(&self) -> &ActorBase {
        &self.base
    }
}
