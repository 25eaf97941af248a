//! The receive channel — framing layer and command layer, kept apart.
//!
//! Layer 1, [`Deframer`]: a three-outcome byte filter. It undoes
//! escaping, accumulates the checksum, and turns the frame byte into a
//! good/bad frame verdict. It knows nothing about what the bytes mean.
//!
//! Layer 2, [`CmdParser`]: a state machine over deframed bytes that
//! recognizes the command records a host tool sends, collects their
//! parameters into bounded buffers, and delivers complete commands to an
//! [`RxHandler`] when the surrounding frame proves good. Malformed input
//! parks the machine in an error state until the next frame boundary;
//! nothing outside the parser is ever affected.
//!
//! [`RxParser`] glues the two together for the common case.

use crate::{ESC, ESC_XOR, FRAME, GOOD_CHKSUM};

// ── Layer 1: deframing ──────────────────────────────────────────

/// What one raw byte amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deframed {
    /// An unescaped in-frame byte (checksum already accumulated).
    Byte(u8),
    /// A frame boundary with a valid checksum.
    GoodFrame,
    /// A frame boundary with a checksum mismatch.
    BadFrame,
    /// Nothing yet (the escape prefix).
    Pending,
}

/// Layer-1 receive framing: escaping and checksum only.
pub struct Deframer {
    esc: bool,
    chksum: u8,
}

impl Deframer {
    pub const fn new() -> Self {
        Self {
            esc: false,
            chksum: 0,
        }
    }

    /// Feeds one raw transport byte.
    pub fn feed(&mut self, raw: u8) -> Deframed {
        if self.esc {
            self.esc = false;
            let b = raw ^ ESC_XOR;
            self.chksum = self.chksum.wrapping_add(b);
            return Deframed::Byte(b);
        }
        match raw {
            ESC => {
                self.esc = true;
                Deframed::Pending
            }
            FRAME => {
                let good = self.chksum == GOOD_CHKSUM;
                self.esc = false;
                self.chksum = 0;
                if good {
                    Deframed::GoodFrame
                } else {
                    Deframed::BadFrame
                }
            }
            b => {
                self.chksum = self.chksum.wrapping_add(b);
                Deframed::Byte(b)
            }
        }
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Command records ─────────────────────────────────────────────

/// Record identifiers of the commands a host may send.
pub const RX_INFO: u8 = 0;
pub const RX_COMMAND: u8 = 1;
pub const RX_RESET: u8 = 2;
pub const RX_TICK: u8 = 3;
pub const RX_PEEK: u8 = 4;
pub const RX_POKE: u8 = 5;
pub const RX_GLB_FILTER: u8 = 6;
pub const RX_LOC_FILTER: u8 = 7;
pub const RX_AO_FILTER: u8 = 8;
pub const RX_EVENT: u8 = 9;

/// Maximum poke payload per record.
pub const POKE_MAX: usize = 8;
/// Global-filter mask width (128 record bits).
pub const GLB_FILTER_LEN: usize = 16;
/// Maximum injected-event payload.
pub const EVT_PAR_MAX: usize = 32;

/// A complete, validated command from the host.
#[derive(Debug, PartialEq, Eq)]
pub enum RxCommand<'a> {
    /// Resend the target-info record.
    Info,
    /// Application-defined callback command.
    Command { id: u8, param: u32 },
    /// Reset the target.
    Reset,
    /// Process one tick at the given rate on the host's behalf.
    Tick { rate: u8 },
    /// Read `len` bytes of memory at `addr` and report them back.
    Peek { addr: u32, len: u8 },
    /// Write bytes into memory at `addr`.
    Poke { addr: u32, data: &'a [u8] },
    /// Replace the global record filter.
    GlbFilter { mask: &'a [u8; GLB_FILTER_LEN] },
    /// Set one local-filter object slot.
    LocFilter { kind: u8, addr: u32 },
    /// Set the actor-priority filter.
    AoFilter { prio: u8 },
    /// Inject an event: allocate, fill with `payload`, dispatch or post
    /// to the actor at `prio`.
    Event { prio: u8, sig: u32, payload: &'a [u8] },
}

/// Receive-channel status, reported out-of-band as a trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// A frame arrived with a checksum mismatch.
    BadChecksum,
    /// The sequence number skipped — frames were lost in transport.
    SeqGap,
    /// Unknown record identifier.
    BadRecord,
    /// A parameter was out of bounds (length, filter id).
    BadParam,
    /// The frame ended in the middle of a record's parameters.
    Truncated,
    /// A frame carried no record at all.
    EmptyFrame,
}

/// Where completed commands and status reports go.
pub trait RxHandler {
    /// A complete command arrived in a good frame.
    fn on_command(&mut self, cmd: RxCommand<'_>);
    /// The channel has something to report about itself.
    fn on_status(&mut self, status: RxStatus);
}

// ── Layer 2: command interpretation ─────────────────────────────

/// Parse position within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    WaitSeq,
    WaitRec,
    WaitInfoFrame,
    WaitCmdId,
    WaitCmdParam,
    WaitCmdFrame,
    WaitResetFrame,
    WaitTickRate,
    WaitTickFrame,
    WaitPeekAddr,
    WaitPeekLen,
    WaitPeekFrame,
    WaitPokeAddr,
    WaitPokeLen,
    WaitPokeData,
    WaitPokeFrame,
    WaitGlbFilterLen,
    WaitGlbFilterData,
    WaitGlbFilterFrame,
    WaitLocFilterId,
    WaitLocFilterAddr,
    WaitLocFilterFrame,
    WaitAoFilterPrio,
    WaitAoFilterFrame,
    WaitEvtPrio,
    WaitEvtSig,
    WaitEvtLen,
    WaitEvtPar,
    WaitEvtFrame,
    Error,
}

/// Parameters collected for the record being parsed.
struct Collect {
    /// Generic 32-bit accumulator (command param, addresses, signal).
    acc: u32,
    /// Bits already shifted into `acc`.
    acc_bits: u8,
    /// Command / filter identifier.
    id: u8,
    /// Priority byte of the event-inject record.
    prio: u8,
    /// Signal of the event-inject record.
    sig: u32,
    /// Secondary address (peek/poke once `acc` is consumed).
    addr: u32,
    /// Declared length still outstanding.
    len: u16,
    /// Bytes gathered so far.
    n: usize,
    /// Poke / filter / event payload bytes.
    data: [u8; EVT_PAR_MAX],
}

impl Collect {
    const fn new() -> Self {
        Self {
            acc: 0,
            acc_bits: 0,
            id: 0,
            prio: 0,
            sig: 0,
            addr: 0,
            len: 0,
            n: 0,
            data: [0; EVT_PAR_MAX],
        }
    }

    /// Accumulates one little-endian byte; true when `bits` are complete.
    fn push_le(&mut self, b: u8, bits: u8) -> bool {
        self.acc |= (b as u32) << self.acc_bits;
        self.acc_bits += 8;
        if self.acc_bits == bits {
            self.acc_bits = 0;
            true
        } else {
            false
        }
    }

    fn take_acc(&mut self) -> u32 {
        core::mem::replace(&mut self.acc, 0)
    }
}

/// Layer-2 receive parsing: commands out of deframed bytes.
pub struct CmdParser {
    state: RxState,
    seq: u8,
    var: Collect,
}

impl CmdParser {
    pub const fn new() -> Self {
        Self {
            state: RxState::WaitSeq,
            seq: 0,
            var: Collect::new(),
        }
    }

    /// Consumes one deframed in-frame byte.
    pub fn data<H: RxHandler>(&mut self, b: u8, h: &mut H) {
        use RxState::*;
        match self.state {
            WaitSeq => {
                self.seq = self.seq.wrapping_add(1);
                if self.seq != b {
                    h.on_status(RxStatus::SeqGap);
                    self.seq = b; // resynchronize
                }
                self.state = WaitRec;
            }
            WaitRec => {
                self.var = Collect::new();
                self.state = match b {
                    RX_INFO => WaitInfoFrame,
                    RX_COMMAND => WaitCmdId,
                    RX_RESET => WaitResetFrame,
                    RX_TICK => WaitTickRate,
                    RX_PEEK => WaitPeekAddr,
                    RX_POKE => WaitPokeAddr,
                    RX_GLB_FILTER => WaitGlbFilterLen,
                    RX_LOC_FILTER => WaitLocFilterId,
                    RX_AO_FILTER => WaitAoFilterPrio,
                    RX_EVENT => WaitEvtPrio,
                    _ => {
                        h.on_status(RxStatus::BadRecord);
                        Error
                    }
                };
            }
            WaitCmdId => {
                self.var.id = b;
                self.state = WaitCmdParam;
            }
            WaitCmdParam => {
                if self.var.push_le(b, 32) {
                    self.state = WaitCmdFrame;
                }
            }
            WaitTickRate => {
                self.var.id = b;
                self.state = WaitTickFrame;
            }
            WaitPeekAddr => {
                if self.var.push_le(b, 32) {
                    self.var.addr = self.var.take_acc();
                    self.state = WaitPeekLen;
                }
            }
            WaitPeekLen => {
                self.var.id = b;
                self.state = WaitPeekFrame;
            }
            WaitPokeAddr => {
                if self.var.push_le(b, 32) {
                    self.var.addr = self.var.take_acc();
                    self.state = WaitPokeLen;
                }
            }
            WaitPokeLen => {
                if b as usize <= POKE_MAX && b > 0 {
                    self.var.len = b as u16;
                    self.var.n = 0;
                    self.state = WaitPokeData;
                } else {
                    h.on_status(RxStatus::BadParam);
                    self.state = Error;
                }
            }
            WaitPokeData => {
                self.var.data[self.var.n] = b;
                self.var.n += 1;
                if self.var.n == self.var.len as usize {
                    self.state = WaitPokeFrame;
                }
            }
            WaitGlbFilterLen => {
                if b as usize == GLB_FILTER_LEN {
                    self.var.n = 0;
                    self.state = WaitGlbFilterData;
                } else {
                    h.on_status(RxStatus::BadParam);
                    self.state = Error;
                }
            }
            WaitGlbFilterData => {
                self.var.data[self.var.n] = b;
                self.var.n += 1;
                if self.var.n == GLB_FILTER_LEN {
                    self.state = WaitGlbFilterFrame;
                }
            }
            WaitLocFilterId => {
                if b < 6 {
                    self.var.id = b;
                    self.state = WaitLocFilterAddr;
                } else {
                    h.on_status(RxStatus::BadParam);
                    self.state = Error;
                }
            }
            WaitLocFilterAddr => {
                if self.var.push_le(b, 32) {
                    self.var.addr = self.var.take_acc();
                    self.state = WaitLocFilterFrame;
                }
            }
            WaitAoFilterPrio => {
                self.var.prio = b;
                self.state = WaitAoFilterFrame;
            }
            WaitEvtPrio => {
                self.var.prio = b;
                self.state = WaitEvtSig;
            }
            WaitEvtSig => {
                if self.var.push_le(b, 16) {
                    self.var.sig = self.var.take_acc();
                    self.state = WaitEvtLen;
                }
            }
            WaitEvtLen => {
                if self.var.push_le(b, 16) {
                    let len = self.var.take_acc();
                    if len as usize <= EVT_PAR_MAX {
                        self.var.len = len as u16;
                        self.var.n = 0;
                        self.state = if len == 0 { WaitEvtFrame } else { WaitEvtPar };
                    } else {
                        h.on_status(RxStatus::BadParam);
                        self.state = Error;
                    }
                }
            }
            WaitEvtPar => {
                self.var.data[self.var.n] = b;
                self.var.n += 1;
                if self.var.n == self.var.len as usize {
                    self.state = WaitEvtFrame;
                }
            }
            // Parameters complete; ignore everything (the checksum byte
            // lands here) until the frame boundary.
            WaitInfoFrame | WaitCmdFrame | WaitResetFrame | WaitTickFrame | WaitPeekFrame
            | WaitPokeFrame | WaitGlbFilterFrame | WaitLocFilterFrame | WaitAoFilterFrame
            | WaitEvtFrame | Error => {}
        }
    }

    /// The frame closed with a good checksum: deliver what it carried.
    pub fn good_frame<H: RxHandler>(&mut self, h: &mut H) {
        use RxState::*;
        match self.state {
            WaitInfoFrame => h.on_command(RxCommand::Info),
            WaitCmdFrame => h.on_command(RxCommand::Command {
                id: self.var.id,
                param: self.var.acc,
            }),
            WaitResetFrame => h.on_command(RxCommand::Reset),
            WaitTickFrame => h.on_command(RxCommand::Tick { rate: self.var.id }),
            WaitPeekFrame => h.on_command(RxCommand::Peek {
                addr: self.var.addr,
                len: self.var.id,
            }),
            WaitPokeFrame => h.on_command(RxCommand::Poke {
                addr: self.var.addr,
                data: &self.var.data[..self.var.n],
            }),
            WaitGlbFilterFrame => {
                let mask: &[u8; GLB_FILTER_LEN] = self.var.data[..GLB_FILTER_LEN]
                    .try_into()
                    .expect("filter width");
                h.on_command(RxCommand::GlbFilter { mask });
            }
            WaitLocFilterFrame => h.on_command(RxCommand::LocFilter {
                kind: self.var.id,
                addr: self.var.addr,
            }),
            WaitAoFilterFrame => h.on_command(RxCommand::AoFilter {
                prio: self.var.prio,
            }),
            WaitEvtFrame => h.on_command(RxCommand::Event {
                prio: self.var.prio,
                sig: self.var.sig,
                payload: &self.var.data[..self.var.n],
            }),
            WaitSeq => h.on_status(RxStatus::EmptyFrame),
            Error => {} // already reported when entering the error state
            _ => h.on_status(RxStatus::Truncated),
        }
        self.state = WaitSeq;
    }

    /// The frame closed with a bad checksum: discard and resynchronize.
    pub fn bad_frame<H: RxHandler>(&mut self, h: &mut H) {
        h.on_status(RxStatus::BadChecksum);
        self.state = RxState::WaitSeq;
    }
}

impl Default for CmdParser {
    fn default() -> Self {
        Self::new()
    }
}

// ── Glue ────────────────────────────────────────────────────────

/// Both layers wired together: raw transport bytes in, commands out.
pub struct RxParser {
    l1: Deframer,
    l2: CmdParser,
}

impl RxParser {
    pub const fn new() -> Self {
        Self {
            l1: Deframer::new(),
            l2: CmdParser::new(),
        }
    }

    /// Feeds one raw byte from the transport.
    pub fn rx_byte<H: RxHandler>(&mut self, raw: u8, h: &mut H) {
        match self.l1.feed(raw) {
            Deframed::Byte(b) => self.l2.data(b, h),
            Deframed::GoodFrame => self.l2.good_frame(h),
            Deframed::BadFrame => self.l2.bad_frame(h),
            Deframed::Pending => {}
        }
    }
}

impl Default for RxParser {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TxChannel;

    /// Collects everything the parser delivers.
    #[derive(Default)]
    struct Sink {
        commands: Vec<String>,
        statuses: Vec<RxStatus>,
    }

    impl RxHandler for Sink {
        fn on_command(&mut self, cmd: RxCommand<'_>) {
            self.commands.push(format!("{:?}", cmd));
        }
        fn on_status(&mut self, status: RxStatus) {
            self.statuses.push(status);
        }
    }

    /// Encode one command frame with the tx framer (the two sides share
    /// the wire format, so the encoder doubles as the test vector
    /// generator).
    fn frame(body: impl Fn(&mut TxChannel)) -> Vec<u8> {
        let mut tx = TxChannel::new();
        tx.init(Box::leak(vec![0u8; 128].into_boxed_slice()));
        body(&mut tx);
        let mut out = Vec::new();
        while let Some(b) = tx.get_byte() {
            out.push(b);
        }
        out
    }

    fn feed(parser: &mut RxParser, bytes: &[u8], sink: &mut Sink) {
        for &b in bytes {
            parser.rx_byte(b, sink);
        }
    }

    #[test]
    fn command_record_roundtrip() {
        let mut p = RxParser::new();
        let mut sink = Sink::default();

        let raw = frame(|tx| {
            tx.begin_rec(RX_COMMAND);
            tx.u8_(3); // command id
            tx.u32_(0x0102_0304);
            tx.end_rec();
        });
        feed(&mut p, &raw, &mut sink);

        assert_eq!(sink.commands, vec!["Command { id: 3, param: 16909060 }"]);
        assert!(sink.statuses.is_empty());
    }

    #[test]
    fn tick_reset_info() {
        let mut p = RxParser::new();
        let mut sink = Sink::default();

        feed(
            &mut p,
            &frame(|tx| {
                tx.begin_rec(RX_TICK);
                tx.u8_(1);
                tx.end_rec();
            }),
            &mut sink,
        );
        feed(
            &mut p,
            &frame(|tx| {
                tx.begin_rec(RX_RESET);
                tx.end_rec();
            }),
            &mut sink,
        );
        feed(
            &mut p,
            &frame(|tx| {
                tx.begin_rec(RX_INFO);
                tx.end_rec();
            }),
            &mut sink,
        );

        assert_eq!(sink.commands, vec!["Tick { rate: 1 }", "Reset", "Info"]);
        assert!(sink.statuses.is_empty());
    }

    #[test]
    fn event_injection_with_payload() {
        let mut p = RxParser::new();
        let mut sink = Sink::default();

        let raw = frame(|tx| {
            tx.begin_rec(RX_EVENT);
            tx.u8_(5); // target priority
            tx.u16_(42); // signal
            tx.u16_(3); // payload length
            tx.u8_(0x7E); // payload that needs escaping on the wire
            tx.u8_(0x7D);
            tx.u8_(9);
            tx.end_rec();
        });
        feed(&mut p, &raw, &mut sink);

        assert_eq!(
            sink.commands,
            vec!["Event { prio: 5, sig: 42, payload: [126, 125, 9] }"]
        );
        assert!(sink.statuses.is_empty());
    }

    #[test]
    fn corrupted_frame_reports_and_resynchronizes() {
        let mut tx = TxChannel::new();
        tx.init(Box::leak(vec![0u8; 64].into_boxed_slice()));
        tx.begin_rec(RX_TICK);
        tx.u8_(0);
        tx.end_rec();
        tx.begin_rec(RX_TICK);
        tx.u8_(4);
        tx.end_rec();
        let mut raw = Vec::new();
        while let Some(b) = tx.get_byte() {
            raw.push(b);
        }

        // Corrupt a payload byte of the first frame, keep the framing.
        raw[2] ^= 0x01;

        let mut p = RxParser::new();
        let mut sink = Sink::default();
        feed(&mut p, &raw, &mut sink);

        // First frame discarded with a report; second parses normally.
        assert_eq!(sink.statuses, vec![RxStatus::BadChecksum]);
        assert_eq!(sink.commands, vec!["Tick { rate: 4 }"]);
    }

    #[test]
    fn sequence_gap_is_reported_not_fatal() {
        // Encode records 1 and 3 (drop record 2) by running the encoder
        // three times and discarding the middle frame.
        let mut tx = TxChannel::new();
        tx.init(Box::leak(vec![0u8; 128].into_boxed_slice()));
        let mut frames = Vec::new();
        for rate in 0..3u8 {
            tx.begin_rec(RX_TICK);
            tx.u8_(rate);
            tx.end_rec();
            let mut f = Vec::new();
            while let Some(b) = tx.get_byte() {
                f.push(b);
            }
            frames.push(f);
        }

        let mut p = RxParser::new();
        let mut sink = Sink::default();
        feed(&mut p, &frames[0], &mut sink);
        feed(&mut p, &frames[2], &mut sink);

        assert_eq!(sink.statuses, vec![RxStatus::SeqGap]);
        assert_eq!(sink.commands, vec!["Tick { rate: 0 }", "Tick { rate: 2 }"]);
    }

    #[test]
    fn bad_filter_length_parks_in_error_until_frame() {
        let mut tx = TxChannel::new();
        tx.init(Box::leak(vec![0u8; 64].into_boxed_slice()));
        tx.begin_rec(RX_GLB_FILTER);
        tx.u8_(4); // wrong width — must be 16
        tx.u8_(0xAA);
        tx.end_rec();
        tx.begin_rec(RX_INFO);
        tx.end_rec();
        let mut raw = Vec::new();
        while let Some(b) = tx.get_byte() {
            raw.push(b);
        }

        let mut p = RxParser::new();
        let mut sink = Sink::default();
        feed(&mut p, &raw, &mut sink);

        // The malformed record is reported once and ignored to the frame
        // boundary; the next frame parses normally.
        assert_eq!(sink.statuses, vec![RxStatus::BadParam]);
        assert_eq!(sink.commands, vec!["Info"]);
    }

    #[test]
    fn glb_filter_mask_roundtrip() {
        let mut p = RxParser::new();
        let mut sink = Sink::default();
        let mask = crate::RecGroup::SM.mask();

        let raw = frame(|tx| {
            tx.begin_rec(RX_GLB_FILTER);
            tx.u8_(GLB_FILTER_LEN as u8);
            for b in mask {
                tx.u8_(b);
            }
            tx.end_rec();
        });
        feed(&mut p, &raw, &mut sink);

        assert_eq!(sink.commands.len(), 1);
        assert!(sink.commands[0].starts_with("GlbFilter"));
        assert!(sink.statuses.is_empty());
    }

    #[test]
    fn truncated_parameters_are_reported() {
        let mut p = RxParser::new();
        let mut sink = Sink::default();

        // A poke record that ends mid-address: encode manually so the
        // frame is well-formed but the record is short.
        let raw = frame(|tx| {
            tx.begin_rec(RX_POKE);
            tx.u8_(0x10); // only one of four address bytes
            tx.end_rec();
        });
        feed(&mut p, &raw, &mut sink);

        assert_eq!(sink.statuses, vec![RxStatus::Truncated]);
        assert!(sink.commands.is_empty());
    }
}
