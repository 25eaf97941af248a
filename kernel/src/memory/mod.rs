//! Event memory — fixed-block pools and reference-counted dynamic events.
//!
//! The kernel never allocates from a general-purpose heap. Applications hand
//! over static storage at startup; [`pool`] carves it into fixed-size blocks
//! and [`dynamic`] turns those blocks into reference-counted events with
//! deterministic reclamation.

pub mod dynamic;
pub mod pool;
