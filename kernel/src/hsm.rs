//! Hierarchical state machines — dispatch, transitions, history queries.
//!
//! States are plain associated functions of the machine type: a state takes
//! the machine and an event and answers with an [`Action`] — handled,
//! unhandled (a guard said no), a transition, or a referral to the
//! superstate. The state tree is encoded entirely in those referrals: every
//! state's final match arm names its superstate, with top-level states
//! naming the root pseudo-state [`top`].
//!
//! ```
//! use pulsar_kernel::evt::{Evt, SIG_USER, Signal};
//! use pulsar_kernel::hsm::{top, Action, Hsm, HsmCore};
//!
//! const SIG_GO: Signal = SIG_USER;
//!
//! struct Blinky {
//!     core: HsmCore<Self>,
//!     blinks: u32,
//! }
//!
//! impl Hsm for Blinky {
//!     fn core(&self) -> &HsmCore<Self> {
//!         &self.core
//!     }
//!     fn initial(&mut self, _e: Option<&Evt>) -> Action<Self> {
//!         Action::Tran(Self::off)
//!     }
//! }
//!
//! impl Blinky {
//!     fn off(_me: &mut Self, e: &Evt) -> Action<Self> {
//!         match e.sig() {
//!             SIG_GO => Action::Tran(Self::on),
//!             _ => Action::Super(top),
//!         }
//!     }
//!     fn on(me: &mut Self, e: &Evt) -> Action<Self> {
//!         match e.sig() {
//!             SIG_GO => {
//!                 me.blinks += 1;
//!                 Action::Tran(Self::off)
//!             }
//!             _ => Action::Super(top),
//!         }
//!     }
//! }
//! ```
//!
//! The engine guarantees run-to-completion semantics: `dispatch` processes
//! exactly one event, performing at most one state transition with the
//! full exit/entry/initial cascade, and returns with the machine resting
//! in a leaf state.

use core::cell::Cell;
use core::ptr::fn_addr_eq;

use crate::evt::{Evt, SIG_EMPTY, SIG_ENTRY, SIG_EXIT, SIG_INIT};
use crate::MAX_NEST_DEPTH;

// ── Reserved probe events ───────────────────────────────────────

static EMPTY_EVT: Evt = Evt::stat(SIG_EMPTY);
static ENTRY_EVT: Evt = Evt::stat(SIG_ENTRY);
static EXIT_EVT: Evt = Evt::stat(SIG_EXIT);
static INIT_EVT: Evt = Evt::stat(SIG_INIT);

// ── State handlers ──────────────────────────────────────────────

/// A state handler: pure dispatch logic for one state of machine `H`.
pub type State<H> = fn(&mut H, &Evt) -> Action<H>;

/// What a state handler did with an event.
pub enum Action<H: Hsm> {
    /// The event is consumed; no transition.
    Handled,
    /// A guard evaluated false — offer the event to the superstate.
    Unhandled,
    /// Take a transition to the given target state.
    Tran(State<H>),
    /// Not this state's event — the named superstate gets it. Every
    /// handler's final match arm returns this (with [`top`] at the root),
    /// which is also how the engine discovers the state tree.
    Super(State<H>),
    /// Returned by [`top`] alone: the event falls off the root silently.
    Ignored,
}

/// The root pseudo-state. Handles nothing, so unhandled events are
/// discarded silently and the superstate walk terminates here. Top-level
/// states name `top` as their superstate; no other handler returns
/// [`Action::Ignored`].
pub fn top<H: Hsm>(_me: &mut H, _e: &Evt) -> Action<H> {
    Action::Ignored
}

// ── Engine storage ──────────────────────────────────────────────

/// Engine bookkeeping embedded in every state machine: the current leaf
/// state. Stable outside `init`/`dispatch`; transition transients live on
/// the engine's stack.
pub struct HsmCore<H: Hsm> {
    state: Cell<State<H>>,
}

impl<H: Hsm> HsmCore<H> {
    /// Const so machines can live in statics. The machine must be taken
    /// through [`Hsm::init`] before the first dispatch.
    pub const fn new() -> Self {
        Self {
            state: Cell::new(not_initialized),
        }
    }
}

impl<H: Hsm> Default for HsmCore<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Placeholder current-state before `init` runs.
fn not_initialized<H: Hsm>(_me: &mut H, _e: &Evt) -> Action<H> {
    panic!("hsm: dispatch before init");
}

// ── The state-machine trait ─────────────────────────────────────

/// A hierarchical state machine.
///
/// Implementors provide storage access ([`core`](Hsm::core)) and the
/// top-most initial transition ([`initial`](Hsm::initial)); the engine
/// provides everything else.
pub trait Hsm: Sized {
    /// Access to the embedded engine storage.
    fn core(&self) -> &HsmCore<Self>;

    /// The top-most initial transition. Runs once, from [`Hsm::init`];
    /// must return [`Action::Tran`]. `e` is the optional initialization
    /// parameter passed to `init`.
    fn initial(&mut self, e: Option<&Evt>) -> Action<Self>;

    /// Executes the top-most initial transition and drills through nested
    /// initial transitions until the machine rests in a leaf state.
    ///
    /// # Panics
    /// If `initial` does not return a transition, or the target nesting
    /// exceeds [`MAX_NEST_DEPTH`].
    fn init(&mut self, e: Option<&Evt>) {
        let target = match self.initial(e) {
            Action::Tran(t) => t,
            _ => panic!("hsm: initial transition must target a state"),
        };
        enter_from_root(self, target);
        let leaf = drill(self, target);
        self.core().state.set(leaf);
    }

    /// Dispatches one event, run-to-completion.
    ///
    /// The event is offered to the current leaf state first and bubbles up
    /// the superstate chain until some state handles it or it falls off
    /// the root. A transition exits up to the transition source, resolves
    /// the least common ancestor with the target, runs the exit and entry
    /// cascades, and finally drills through nested initial transitions.
    fn dispatch(&mut self, e: &Evt) {
        let leaf = self.core().state.get();

        // Trigger search: find the state that answers for this event.
        let mut s = leaf;
        let outcome = loop {
            let r = match s(self, e) {
                // A guard said no: the superstate gets a chance.
                Action::Unhandled => match super_of(self, s) {
                    Some(p) => Action::Super(p),
                    None => Action::Ignored,
                },
                other => other,
            };
            match r {
                Action::Super(p) => s = p,
                other => break other,
            }
        };

        if let Action::Tran(target) = outcome {
            // Exit from the current leaf up to the transition source.
            let mut t = leaf;
            while !same(t, s) {
                t = exit_and_super(self, t);
            }
            // Source-to-target transition with LCA resolution.
            tran(self, s, target);
            // Settle into a leaf via nested initial transitions.
            let new_leaf = drill(self, target);
            self.core().state.set(new_leaf);
        }
        // Handled or Ignored: the current state is unchanged.
    }

    /// The current leaf state. Stable between dispatches; during exit
    /// actions it still names the pre-transition leaf, which is exactly
    /// what deep-history recording wants.
    fn state(&self) -> State<Self> {
        self.core().state.get()
    }

    /// True when `state` is the current leaf or one of its ancestors.
    fn is_in(&mut self, state: State<Self>) -> bool {
        let mut cur = self.core().state.get();
        loop {
            if same(cur, state) {
                return true;
            }
            match super_of(self, cur) {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    /// The immediate child of `parent` on the current active path — the
    /// shallow-history target to record when exiting `parent`.
    ///
    /// # Panics
    /// If `parent` is not an ancestor of the current leaf.
    fn child_state(&mut self, parent: State<Self>) -> State<Self> {
        let mut child = self.core().state.get();
        loop {
            match super_of(self, child) {
                Some(p) if same(p, parent) => return child,
                Some(p) => child = p,
                None => panic!("hsm: parent state not on the active path"),
            }
        }
    }
}

// ── Engine internals ────────────────────────────────────────────

/// Handler identity: two values denote the same state exactly when they
/// are the same named function. Public for applications that record
/// states (history patterns) and compare them later.
#[inline]
pub fn same_state<H: Hsm>(a: State<H>, b: State<H>) -> bool {
    fn_addr_eq(a, b)
}

#[inline]
fn same<H: Hsm>(a: State<H>, b: State<H>) -> bool {
    same_state(a, b)
}

/// Asks a state for its superstate; `None` means the root was reached.
fn super_of<H: Hsm>(me: &mut H, s: State<H>) -> Option<State<H>> {
    match s(me, &EMPTY_EVT) {
        Action::Super(p) => Some(p),
        Action::Ignored => None,
        _ => panic!("hsm: superstate probe answered with an action"),
    }
}

/// Runs a state's entry action.
fn enter_action<H: Hsm>(me: &mut H, s: State<H>) {
    if let Action::Tran(_) = s(me, &ENTRY_EVT) {
        panic!("hsm: transition in entry action");
    }
}

/// Runs a state's exit action and returns its superstate.
fn exit_and_super<H: Hsm>(me: &mut H, s: State<H>) -> State<H> {
    match s(me, &EXIT_EVT) {
        Action::Tran(_) => panic!("hsm: transition in exit action"),
        // No exit action: the default arm already named the superstate.
        Action::Super(p) => p,
        _ => super_of(me, s).expect("hsm: exited the root state"),
    }
}

/// Runs a state's exit action, discarding the superstate.
fn exit_action<H: Hsm>(me: &mut H, s: State<H>) {
    if let Action::Tran(_) = s(me, &EXIT_EVT) {
        panic!("hsm: transition in exit action");
    }
}

/// Transition from `source` to `target`, both already established:
/// the machine currently stands *in* `source` (deeper states are exited).
/// Exits up to the least common ancestor and enters down to the target.
fn tran<H: Hsm>(me: &mut H, source: State<H>, target: State<H>) {
    // A self-transition exits and re-enters its state.
    if same(source, target) {
        exit_action(me, source);
        enter_action(me, target);
        return;
    }

    // Materialize the target's ancestor chain: target first, root last.
    // This is the bounded path buffer — nesting beyond MAX_NEST_DEPTH
    // is a programming error.
    let mut path: [State<H>; MAX_NEST_DEPTH] = [target; MAX_NEST_DEPTH];
    let mut len = 1;
    let mut cur = super_of(me, target);
    while let Some(p) = cur {
        assert!(len < MAX_NEST_DEPTH, "hsm: nesting exceeds MAX_NEST_DEPTH");
        path[len] = p;
        len += 1;
        cur = super_of(me, p);
    }

    // Walk the source's chain upward, exiting as we go, until standing on
    // a state that also appears on the target's chain — that state is the
    // least common ancestor (possibly the root, which ends both chains).
    let mut s = source;
    let lca = loop {
        if let Some(k) = (0..len).find(|&i| same(path[i], s)) {
            break k;
        }
        s = exit_and_super(me, s);
    };

    // Enter from just below the LCA down to the target.
    for i in (0..lca).rev() {
        enter_action(me, path[i]);
    }
}

/// Enters every state from the root down to `target` (used by `init`,
/// where no state is active yet).
fn enter_from_root<H: Hsm>(me: &mut H, target: State<H>) {
    let mut path: [State<H>; MAX_NEST_DEPTH] = [target; MAX_NEST_DEPTH];
    let mut len = 1;
    let mut cur = super_of(me, target);
    while let Some(p) = cur {
        assert!(len < MAX_NEST_DEPTH, "hsm: nesting exceeds MAX_NEST_DEPTH");
        path[len] = p;
        len += 1;
        cur = super_of(me, p);
    }
    // path[len-1] is the root pseudo-state when the chain is fully
    // grounded; it is never entered itself.
    let deepest_real = len - 1;
    for i in (0..deepest_real).rev() {
        enter_action(me, path[i]);
    }
}

/// Drills through nested initial transitions from `from` (just entered)
/// until some state has no initial transition; returns the final leaf.
fn drill<H: Hsm>(me: &mut H, from: State<H>) -> State<H> {
    let mut t = from;
    loop {
        let target = match t(me, &INIT_EVT) {
            Action::Tran(tgt) => tgt,
            Action::Handled | Action::Super(_) | Action::Ignored => break t,
            Action::Unhandled => break t,
        };
        // The initial target must be a descendant of `t`; enter the chain
        // between them, outermost first.
        let mut path: [State<H>; MAX_NEST_DEPTH] = [target; MAX_NEST_DEPTH];
        let mut len = 1;
        let mut cur = super_of(me, target);
        loop {
            match cur {
                Some(p) if same(p, t) => break,
                Some(p) => {
                    assert!(len < MAX_NEST_DEPTH, "hsm: nesting exceeds MAX_NEST_DEPTH");
                    path[len] = p;
                    len += 1;
                    cur = super_of(me, p);
                }
                None => panic!("hsm: initial transition must target a substate"),
            }
        }
        for i in (0..len).rev() {
            enter_action(me, path[i]);
        }
        t = target;
    }
}
