//! The transmit channel — record framing into a drain-from-anywhere ring.
//!
//! Records are produced inside the integrator's critical region
//! (`begin_rec` … typed writers … `end_rec`) and drained byte-wise from
//! the idle loop or a TX-ready interrupt via [`TxChannel::get_byte`] /
//! [`TxChannel::get_block`]. When production outruns the drain, the
//! oldest bytes are overwritten: the receiver sees a checksum mismatch
//! and a sequence gap and knows records were lost, while the newest data
//! — the data that describes the problem — survives.

use crate::{ESC, ESC_XOR, FRAME};

/// Transmit ring with record framing.
///
/// Not internally locked: the integrator serializes producers the same
/// way it serializes the rest of its kernel instrumentation.
pub struct TxChannel {
    buf: Option<&'static mut [u8]>,
    /// Insertion index.
    head: usize,
    /// Extraction index.
    tail: usize,
    /// Bytes currently stored.
    used: usize,
    /// Record sequence number (increments per record, wraps).
    seq: u8,
    /// Running checksum of the open record.
    chksum: u8,
    /// Records clobbered by overruns since init.
    overruns: u32,
}

impl TxChannel {
    /// Creates an unbuffered channel; call [`init`](Self::init) before
    /// tracing. Const so the channel can live in a static.
    pub const fn new() -> Self {
        Self {
            buf: None,
            head: 0,
            tail: 0,
            used: 0,
            seq: 0,
            chksum: 0,
            overruns: 0,
        }
    }

    /// Installs the ring storage.
    ///
    /// # Panics
    /// If called twice or with an empty buffer.
    pub fn init(&mut self, sto: &'static mut [u8]) {
        assert!(self.buf.is_none(), "trace: tx already initialized");
        assert!(sto.len() >= 8, "trace: tx buffer too small");
        self.buf = Some(sto);
    }

    /// Opens a record: emits the incremented sequence number and the
    /// record identifier, and starts the checksum.
    pub fn begin_rec(&mut self, rec: u8) {
        self.seq = self.seq.wrapping_add(1);
        self.chksum = 0;
        let seq = self.seq;
        self.put_escaped(seq);
        self.put_escaped(rec);
    }

    /// Closes the record: ones-complement checksum, then the frame byte.
    pub fn end_rec(&mut self) {
        let chk = self.chksum ^ 0xFF;
        if chk == FRAME || chk == ESC {
            self.put_raw(ESC);
            self.put_raw(chk ^ ESC_XOR);
        } else {
            self.put_raw(chk);
        }
        self.put_raw(FRAME);
    }

    /// Writes one payload byte.
    pub fn u8_(&mut self, b: u8) {
        self.put_escaped(b);
    }

    /// Writes a little-endian 16-bit payload value.
    pub fn u16_(&mut self, v: u16) {
        for b in v.to_le_bytes() {
            self.put_escaped(b);
        }
    }

    /// Writes a little-endian 32-bit payload value.
    pub fn u32_(&mut self, v: u32) {
        for b in v.to_le_bytes() {
            self.put_escaped(b);
        }
    }

    /// Writes a little-endian 64-bit payload value.
    pub fn u64_(&mut self, v: u64) {
        for b in v.to_le_bytes() {
            self.put_escaped(b);
        }
    }

    /// Writes an IEEE-754 single-precision payload value.
    pub fn f32_(&mut self, v: f32) {
        self.u32_(v.to_bits());
    }

    /// Writes an IEEE-754 double-precision payload value.
    pub fn f64_(&mut self, v: f64) {
        self.u64_(v.to_bits());
    }

    /// Writes a zero-terminated string payload.
    pub fn str_(&mut self, s: &str) {
        for &b in s.as_bytes() {
            self.put_escaped(b);
        }
        self.put_escaped(0);
    }

    /// Writes a length-prefixed memory block payload (up to 255 bytes).
    pub fn mem_(&mut self, m: &[u8]) {
        debug_assert!(m.len() <= u8::MAX as usize, "trace: block too long");
        self.put_escaped(m.len() as u8);
        for &b in m {
            self.put_escaped(b);
        }
    }

    /// Emits a signal-dictionary record: the host substitutes `name` for
    /// the numeric signal in its displays.
    pub fn sig_dict(&mut self, sig: u16, name: &str) {
        self.begin_rec(crate::REC_SIG_DICT);
        self.u16_(sig);
        self.str_(name);
        self.end_rec();
    }

    /// Emits an object-dictionary record naming the object at `addr`
    /// (an actor, a queue, a pool) for the host's displays.
    pub fn obj_dict(&mut self, addr: usize, name: &str) {
        self.begin_rec(crate::REC_OBJ_DICT);
        self.u32_(addr as u32);
        self.str_(name);
        self.end_rec();
    }

    /// Takes the next byte for the transport, oldest first.
    pub fn get_byte(&mut self) -> Option<u8> {
        if self.used == 0 {
            return None;
        }
        let buf = self.buf.as_ref().expect("trace: tx not initialized");
        let b = buf[self.tail];
        self.tail = (self.tail + 1) % buf.len();
        self.used -= 1;
        Some(b)
    }

    /// Fills `dst` with pending bytes; returns how many were copied.
    pub fn get_block(&mut self, dst: &mut [u8]) -> usize {
        let mut n = 0;
        while n < dst.len() {
            match self.get_byte() {
                Some(b) => {
                    dst[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Bytes waiting for the transport.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes clobbered by ring overruns since init.
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    /// Inserts with escaping and checksum accumulation.
    fn put_escaped(&mut self, b: u8) {
        self.chksum = self.chksum.wrapping_add(b);
        if b == FRAME || b == ESC {
            self.put_raw(ESC);
            self.put_raw(b ^ ESC_XOR);
        } else {
            self.put_raw(b);
        }
    }

    /// Inserts one byte, overwriting the oldest on overrun.
    fn put_raw(&mut self, b: u8) {
        let buf = self.buf.as_mut().expect("trace: tx not initialized");
        if self.used == buf.len() {
            // Overrun: sacrifice the oldest byte; the receiver notices
            // through the checksum and the sequence gap.
            self.tail = (self.tail + 1) % buf.len();
            self.used -= 1;
            self.overruns += 1;
        }
        buf[self.head] = b;
        self.head = (self.head + 1) % buf.len();
        self.used += 1;
    }
}

impl Default for TxChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GOOD_CHKSUM;

    fn channel(len: usize) -> TxChannel {
        let mut tx = TxChannel::new();
        tx.init(Box::leak(vec![0u8; len].into_boxed_slice()));
        tx
    }

    fn drain(tx: &mut TxChannel) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = tx.get_byte() {
            out.push(b);
        }
        out
    }

    /// Undo escaping and verify the checksum the way a receiver would.
    fn unframe(raw: &[u8]) -> Vec<u8> {
        assert_eq!(*raw.last().unwrap(), FRAME);
        let mut out = Vec::new();
        let mut esc = false;
        let mut sum = 0u8;
        for &b in &raw[..raw.len() - 1] {
            let b = if esc {
                esc = false;
                b ^ ESC_XOR
            } else if b == ESC {
                esc = true;
                continue;
            } else {
                b
            };
            sum = sum.wrapping_add(b);
            out.push(b);
        }
        assert_eq!(sum, GOOD_CHKSUM, "checksum over a good frame");
        out
    }

    #[test]
    fn records_frame_and_checksum() {
        let mut tx = channel(64);
        tx.begin_rec(7);
        tx.u8_(0xAB);
        tx.u16_(0x1234);
        tx.end_rec();

        let frame = unframe(&drain(&mut tx));
        // seq, rec, payload (checksum verified inside unframe)
        assert_eq!(&frame[..5], &[1, 7, 0xAB, 0x34, 0x12]);
    }

    #[test]
    fn frame_and_escape_bytes_are_escaped() {
        let mut tx = channel(64);
        tx.begin_rec(1);
        tx.u8_(FRAME);
        tx.u8_(ESC);
        tx.end_rec();

        let raw = drain(&mut tx);
        // Exactly one unescaped frame byte: the terminator.
        assert_eq!(raw.iter().filter(|&&b| b == FRAME).count(), 1);
        let frame = unframe(&raw);
        assert_eq!(&frame[..4], &[1, 1, FRAME, ESC]);
    }

    // Record identifiers 125 and 126 collide with the escape and frame
    // bytes and sit inside the USR range, so they must survive framing
    // like any other in-record byte.
    #[test]
    fn escape_range_record_ids_are_escaped() {
        use crate::rx::{Deframed, Deframer};

        let mut tx = channel(64);
        tx.begin_rec(ESC);
        tx.u8_(1);
        tx.end_rec();
        tx.begin_rec(FRAME);
        tx.end_rec();

        let raw = drain(&mut tx);
        // The only unescaped frame bytes are the two terminators.
        assert_eq!(raw.iter().filter(|&&b| b == FRAME).count(), 2);

        // The deframer resynchronizes on exactly those terminators and
        // sees both frames as good.
        let mut l1 = Deframer::new();
        let good = raw
            .iter()
            .filter(|&&b| l1.feed(b) == Deframed::GoodFrame)
            .count();
        assert_eq!(good, 2);

        // And the record identifiers come back out intact.
        let frames: Vec<_> = raw.split(|&b| b == FRAME).filter(|f| !f.is_empty()).collect();
        let first = unframe(&[frames[0], &[FRAME]].concat());
        assert_eq!(&first[..3], &[1, ESC, 1]);
        let second = unframe(&[frames[1], &[FRAME]].concat());
        assert_eq!(&second[..2], &[2, FRAME]);
    }

    #[test]
    fn sequence_increments_per_record() {
        let mut tx = channel(64);
        for _ in 0..3 {
            tx.begin_rec(2);
            tx.end_rec();
        }
        let raw = drain(&mut tx);
        let frames: Vec<_> = raw.split(|&b| b == FRAME).filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0][0], 1);
        assert_eq!(frames[1][0], 2);
        assert_eq!(frames[2][0], 3);
    }

    #[test]
    fn overrun_drops_oldest_and_counts() {
        let mut tx = channel(8);
        for i in 0..4 {
            tx.begin_rec(10 + i);
            tx.u32_(0xDEAD_BEEF);
            tx.end_rec();
        }
        assert!(tx.overruns() > 0);
        assert_eq!(tx.used(), 8, "ring stays full, newest data wins");
    }

    #[test]
    fn wide_and_float_writers() {
        let mut tx = channel(64);
        tx.begin_rec(4);
        tx.u64_(0x0102_0304_0506_0708);
        tx.f32_(1.5);
        tx.end_rec();

        let frame = unframe(&drain(&mut tx));
        assert_eq!(&frame[2..10], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&frame[10..14], &1.5f32.to_bits().to_le_bytes());
    }

    #[test]
    fn dictionary_records() {
        let mut tx = channel(64);
        tx.sig_dict(42, "EAT");
        tx.obj_dict(0x2000_0000, "table");

        let raw = drain(&mut tx);
        let frames: Vec<_> = raw.split(|&b| b == FRAME).filter(|f| !f.is_empty()).collect();
        assert_eq!(frames.len(), 2);
        // Unescaped record ids sit right after the sequence byte.
        assert_eq!(frames[0][1], crate::REC_SIG_DICT);
        assert_eq!(frames[1][1], crate::REC_OBJ_DICT);
    }

    #[test]
    fn strings_and_blocks() {
        let mut tx = channel(64);
        tx.begin_rec(3);
        tx.str_("ok");
        tx.mem_(&[1, 2, 3]);
        tx.end_rec();

        let frame = unframe(&drain(&mut tx));
        assert_eq!(&frame[2..frame.len() - 1], &[b'o', b'k', 0, 3, 1, 2, 3]);
    }
}
