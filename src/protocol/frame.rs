use crate::drivers::crc::Crc32;

pub const PREAMBLE: u8 = 0x7E;
pub const POSTAMBLE: u8 = 0x81;
pub const ESCAPE: u8 = 0x55;

pub fn is_reserved(byte: u8) -> bool {
    matches!(byte, PREAMBLE | POSTAMBLE | ESCAPE)
}

/// Outgoing byte sink. Writes never block; the owner flushes to the wire.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]);

    /// Bytes that can still be written before the sink overflows.
    fn free(&self) -> usize {
        usize::MAX
    }
}

impl<const N: usize> Transport for heapless::Vec<u8, N> {
    fn write(&mut self, bytes: &[u8]) {
        if self.extend_from_slice(bytes).is_err() {
            warn!("tx queue full, {} bytes dropped", bytes.len());
        }
    }

    fn free(&self) -> usize {
        N - self.len()
    }
}

#[cfg(test)]
impl Transport for std::vec::Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Write `data` with an escape in front of every reserved byte.
pub fn write_stuffed<T: Transport + ?Sized>(tx: &mut T, data: &[u8]) {
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if is_reserved(b) {
            tx.write(&data[start..i]);
            tx.write(&[ESCAPE]);
            start = i;
        }
    }
    tx.write(&data[start..]);
}

/// Length of `data` once stuffed.
pub fn stuffed_len(data: &[u8]) -> usize {
    data.len() + data.iter().filter(|&&b| is_reserved(b)).count()
}

/// Frames outgoing packets and numbers them.
pub struct FrameWriter {
    seq: u8,
}

impl FrameWriter {
    pub const fn new() -> Self {
        Self { seq: 0 }
    }

    /// Sequence number the next frame will carry.
    pub fn next_sequence(&self) -> u8 {
        self.seq
    }

    /// Queue one frame. Returns `false`, leaving `tx` and the sequence
    /// untouched, when the whole frame does not fit.
    pub fn send<T: Transport + ?Sized>(&mut self, tx: &mut T, cmd: u8, payload: &[u8]) -> bool {
        let crc = Crc32::new().fold_byte(cmd).fold(payload);
        self.send_precalc(tx, cmd, payload, crc)
    }

    /// Like [`send`](Self::send) with `crc` already covering `cmd` and
    /// `payload`; only the sequence byte is folded in here.
    pub fn send_precalc<T: Transport + ?Sized>(
        &mut self,
        tx: &mut T,
        cmd: u8,
        payload: &[u8],
        crc: Crc32,
    ) -> bool {
        let seq = self.seq;
        let crc = crc.fold_byte(seq).finish().to_le_bytes();

        let len = 2 + stuffed_len(&[cmd]) + stuffed_len(payload) + stuffed_len(&[seq]) + stuffed_len(&crc);
        if len > tx.free() {
            warn!("frame {=u8:#x} of {} bytes does not fit the tx queue", cmd, len);
            return false;
        }

        self.seq = self.seq.wrapping_add(1);
        tx.write(&[PREAMBLE]);
        write_stuffed(tx, &[cmd]);
        write_stuffed(tx, payload);
        write_stuffed(tx, &[seq]);
        write_stuffed(tx, &crc);
        tx.write(&[POSTAMBLE]);
        true
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}
