//! Pulsar — a real-time active-object kernel for event-driven systems.
//!
//! Applications are fixed sets of *actors*: prioritized state machines
//! with private event queues. The kernel routes events between them with
//! deterministic ordering and memory behavior:
//!
//! - [`hsm`] — hierarchical state machines with full UML transition
//!   semantics (entry/exit cascades, nested initial transitions, history
//!   queries).
//! - [`queue`] — fixed-capacity event queues: FIFO with LIFO urgency.
//! - [`memory`] — fixed-block event pools and reference-counted dynamic
//!   events; no heap, no fragmentation, O(1) everything.
//! - [`sched`] — preemptive fixed-priority scheduling at
//!   run-to-completion granularity on a single stack, plus the
//!   priority-ceiling mutex.
//! - [`actor`] — the binding of machine + queue + priority, with
//!   defer/recall escrow.
//! - [`time`] — one-shot and periodic time events on per-rate timing
//!   wheels.
//! - [`pubsub`] — signal-indexed publish–subscribe fan-out.
//!
//! The kernel is `no_std` and free of internal allocation; applications
//! donate static storage for queues, pools, and the subscriber table at
//! startup. Interrupt plumbing belongs to the integrator: bracket ISRs
//! with [`sched::isr_enter`]/[`sched::isr_exit`] and call [`time::tick`]
//! from periodic interrupts.

#![cfg_attr(not(test), no_std)]

pub mod actor;
pub mod evt;
pub mod hsm;
pub mod memory;
pub mod pubsub;
pub mod queue;
pub mod sched;
pub mod sync;
pub mod time;

#[cfg(test)]
pub(crate) mod testsupport;

pub use actor::{Actor, ActorBase, ActorRef};
pub use evt::{Evt, Payload, Signal};
pub use hsm::{Action, Hsm, HsmCore, State};
pub use queue::{EvtQueue, EvtSlot};
pub use sched::{Bsp, CeilingMutex, run};
pub use time::TimeEvt;

/// Highest usable actor priority; priorities are `1..=MAX_ACTIVE`, larger
/// is more urgent, 0 is the idle level.
pub const MAX_ACTIVE: usize = 64;

/// Deepest supported state nesting (the bounded transition path buffer).
pub const MAX_NEST_DEPTH: usize = 6;

/// Number of independent tick rates.
pub const MAX_TICK_RATES: usize = 2;

/// Maximum number of event pools.
pub const MAX_POOLS: usize = 3;

/// The margin value that makes resource exhaustion fatal instead of
/// reporting failure: "this post/allocation must not fail".
pub const NO_MARGIN: u16 = 0;

/// Kernel version, straight from the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
