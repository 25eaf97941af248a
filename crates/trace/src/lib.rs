//! Pulsar trace wire format.
//!
//! A host-side tool observes (and steers) a running target over a byte
//! pipe. This crate implements both directions of that pipe as pure data
//! plumbing — no kernel types, no I/O:
//!
//! - [`tx`] — the transmit channel: self-delimited, escaped, checksummed
//!   records drained byte-wise into whatever transport the integrator has.
//! - [`rx`] — the receive channel, split in two layers: a [`rx::Deframer`]
//!   that undoes escaping and validates checksums (layer 1), and a
//!   [`rx::CmdParser`] that interprets the framed bytes as commands
//!   (layer 2). The layers share no state, so either is usable alone —
//!   a bootloader can reuse the deframer without dragging in command
//!   parsing.
//!
//! ## Framing
//!
//! Every record is `seq, record-id, payload…, checksum`, terminated by
//! the frame byte `0x7E`. Occurrences of `0x7E` and `0x7D` inside a
//! record are escaped as `0x7D, byte ^ 0x20`. The checksum is the
//! ones-complement of the byte sum over sequence, id, and payload, so a
//! receiver adding up every unescaped byte of a good frame (checksum
//! included) always arrives at `0xFF`.

#![cfg_attr(not(test), no_std)]

pub mod rx;
pub mod tx;

use bitflags::bitflags;

/// Frame delimiter byte.
pub const FRAME: u8 = 0x7E;
/// Escape byte.
pub const ESC: u8 = 0x7D;
/// XOR applied to an escaped byte.
pub const ESC_XOR: u8 = 0x20;
/// Running sum of every unescaped byte of a good frame.
pub const GOOD_CHKSUM: u8 = 0xFF;

// ── Transmit record identifiers ─────────────────────────────────
//
// The kernel-side record vocabulary is the integrator's business; only
// the identifiers the protocol itself relies on are fixed here.

/// Empty record (sequence-number keep-alive).
pub const REC_EMPTY: u8 = 0;
/// Target description record sent on startup and on reset requests.
pub const REC_TARGET_INFO: u8 = 64;
/// Receive-channel status report (acks and errors).
pub const REC_RX_STATUS: u8 = 65;
/// Signal-dictionary record (numeric signal → display name).
pub const REC_SIG_DICT: u8 = 66;
/// Object-dictionary record (address → display name).
pub const REC_OBJ_DICT: u8 = 67;
/// First record identifier available to applications.
pub const REC_USER: u8 = 100;

bitflags! {
    /// Record groups for the global filter: each group covers a fixed
    /// range of record identifiers, and [`RecGroup::mask`] expands a
    /// group set into the 128-bit per-record mask the wire carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecGroup: u8 {
        /// State machine activity (dispatch, transitions).
        const SM = 1 << 0;
        /// Actor life cycle and posting.
        const AO = 1 << 1;
        /// Event queues.
        const EQ = 1 << 2;
        /// Memory pools.
        const MP = 1 << 3;
        /// Time events and ticks.
        const TE = 1 << 4;
        /// Framework-level records (publish, garbage collection).
        const QF = 1 << 5;
        /// Scheduler records (preemption, ceiling changes).
        const SC = 1 << 6;
        /// Application records (`REC_USER` and up).
        const USR = 1 << 7;
    }
}

impl RecGroup {
    /// Record-identifier range covered by each group.
    fn range(bit: RecGroup) -> core::ops::RangeInclusive<u8> {
        match bit {
            RecGroup::SM => 1..=15,
            RecGroup::AO => 16..=31,
            RecGroup::EQ => 32..=39,
            RecGroup::MP => 40..=47,
            RecGroup::TE => 48..=59,
            RecGroup::QF => 60..=79,
            RecGroup::SC => 80..=89,
            RecGroup::USR => REC_USER..=127,
            _ => 0..=0,
        }
    }

    /// Expands this group set into the 16-byte (128-record) filter mask
    /// carried by the global-filter command.
    pub fn mask(self) -> [u8; 16] {
        let mut mask = [0u8; 16];
        for bit in self.iter() {
            for rec in Self::range(bit) {
                mask[(rec >> 3) as usize] |= 1 << (rec & 7);
            }
        }
        mask
    }
}
