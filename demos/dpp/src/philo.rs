//! A philosopher: thinking → hungry → eating, forever.
//!
//! Thinking and eating durations come from the board's random source and
//! run on the philosopher's own time event. Hunger is reported straight
//! to the table; the grant (EAT) and the completion (DONE) are published
//! so the table and any observer can watch the protocol.

use pulsar_kernel::actor::{Actor, ActorBase, ActorRef};
use pulsar_kernel::evt::Evt;
use pulsar_kernel::hsm::{Action, Hsm, HsmCore, top};
use pulsar_kernel::time::TimeEvt;
use pulsar_kernel::{NO_MARGIN, Payload, pubsub};

use crate::bsp;
use crate::{DONE_SIG, EAT_SIG, HUNGRY_SIG, TABLE_PRIO, TIMEOUT_SIG, TableEvt, philo_prio};

pub struct Philo {
    core: HsmCore<Self>,
    base: ActorBase,
    timer: TimeEvt,
    id: u8,
}

impl Philo {
    pub fn new(id: u8) -> Self {
        Self {
            core: HsmCore::new(),
            base: ActorBase::new(),
            timer: TimeEvt::new(ActorRef::new(philo_prio(id as usize)), TIMEOUT_SIG, 0),
            id,
        }
    }

    fn me(&self) -> ActorRef {
        ActorRef::new(philo_prio(self.id as usize))
    }

    // ── States ──────────────────────────────────────────────────

    fn thinking(me: &mut Self, e: &Evt) -> Action<Self> {
        match e.sig() {
            pulsar_kernel::evt::SIG_ENTRY => {
                bsp::philo_stat(me.id, "thinking");
                // SAFETY: the philosopher is started from a leaked
                // allocation, so the time event is pinned for good.
                unsafe { me.timer.arm(bsp::random_ticks(), 0) };
                Action::Handled
            }
            TIMEOUT_SIG => Action::Tran(Self::hungry),
            _ => Action::Super(top),
        }
    }

    fn hungry(me: &mut Self, e: &Evt) -> Action<Self> {
        match e.sig() {
            pulsar_kernel::evt::SIG_ENTRY => {
                bsp::philo_stat(me.id, "hungry");
                let req = TableEvt::new(HUNGRY_SIG, me.id);
                ActorRef::new(TABLE_PRIO).post(req.evt(), NO_MARGIN, Some(me.me()));
                Action::Handled
            }
            EAT_SIG => {
                // The grant names one philosopher; everyone else keeps
                // waiting.
                // SAFETY: EAT events are always TableEvt.
                let grant = unsafe { e.downcast::<TableEvt>() };
                if grant.philo == me.id {
                    Action::Tran(Self::eating)
                } else {
                    Action::Handled
                }
            }
            _ => Action::Super(top),
        }
    }

    fn eating(me: &mut Self, e: &Evt) -> Action<Self> {
        match e.sig() {
            pulsar_kernel::evt::SIG_ENTRY => {
                bsp::philo_stat(me.id, "eating");
                // SAFETY: pinned as in `thinking`.
                unsafe { me.timer.arm(bsp::random_ticks(), 0) };
                Action::Handled
            }
            TIMEOUT_SIG => Action::Tran(Self::thinking),
            pulsar_kernel::evt::SIG_EXIT => {
                let done = TableEvt::new(DONE_SIG, me.id);
                pubsub::publish(done.evt(), NO_MARGIN, Some(me.me()));
                Action::Handled
            }
            _ => Action::Super(top),
        }
    }
}

impl Hsm for Philo {
    fn core(&self) -> &HsmCore<Self> {
        &self.core
    }

    fn initial(&mut self, _e: Option<&Evt>) -> Action<Self> {
        pubsub::subscribe(self.me(), EAT_SIG);
        Action::Tran(Self::thinking)
    }
}

impl Actor for Philo {
    fn base(&self) -> &ActorBase {
        &self.base
    }
}
