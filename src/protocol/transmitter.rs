//! Outbound telemetry: (temperature, resistance) pairs collected into one half
//! of a double buffer while the other, completed half waits for `GET_DATA`.
//!
//! Each half carries a running CRC that already covers the `GET_DATA` command
//! byte, so sending a full half only folds in the sequence number.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::command::Command;
use super::frame::{FrameWriter, Transport};
use super::setpoints::CYCLE_LENGTH;
use crate::drivers::crc::Crc32;

pub const PAIR_BYTES: usize = 8;
pub const TELEMETRY_BYTES: usize = CYCLE_LENGTH * PAIR_BYTES;

const SEED: Crc32 = Crc32::new().fold_byte(Command::GetData as u8);

struct Buffers {
    data: [[u8; TELEMETRY_BYTES]; 2],
    crc: [Crc32; 2],
    filling: usize,
    cursor: usize,
    have_data: bool,
}

pub struct Telemetry {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Buffers>>,
}

impl Telemetry {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Buffers {
                data: [[0; TELEMETRY_BYTES]; 2],
                // The idle half is all zeros and can be sent as is.
                crc: [SEED, SEED.fold(&[0; TELEMETRY_BYTES])],
                filling: 0,
                cursor: 0,
                have_data: false,
            })),
        }
    }

    /// Append one measurement. Returns `true` when it completed a half.
    pub fn enqueue(&self, temperature: f32, resistance: f32) -> bool {
        let mut pair = [0u8; PAIR_BYTES];
        pair[..4].copy_from_slice(&temperature.to_le_bytes());
        pair[4..].copy_from_slice(&resistance.to_le_bytes());

        self.inner.lock(|b| {
            let mut b = b.borrow_mut();
            let (filling, at) = (b.filling, b.cursor);
            b.data[filling][at..at + PAIR_BYTES].copy_from_slice(&pair);
            b.crc[filling] = b.crc[filling].fold(&pair);
            b.cursor += PAIR_BYTES;

            if b.cursor < TELEMETRY_BYTES {
                return false;
            }
            b.filling = 1 - filling;
            let next = b.filling;
            b.crc[next] = SEED;
            b.cursor = 0;
            b.have_data = true;
            true
        })
    }

    pub fn have_data(&self) -> bool {
        self.inner.lock(|b| b.borrow().have_data)
    }

    /// Frame the completed half into `tx` and clear the data-ready flag. The
    /// half is copied out first so the lock is not held while stuffing. When
    /// the frame does not fit, the flag stays set and `false` is returned.
    pub fn send_full_buffer<T: Transport + ?Sized>(&self, writer: &mut FrameWriter, tx: &mut T) -> bool {
        let mut half = [0u8; TELEMETRY_BYTES];
        let crc = self.inner.lock(|b| {
            let mut b = b.borrow_mut();
            let full = 1 - b.filling;
            half.copy_from_slice(&b.data[full]);
            b.have_data = false;
            b.crc[full]
        });

        let sent = writer.send_precalc(tx, Command::GetData.id(), &half, crc);
        if !sent {
            self.inner.lock(|b| b.borrow_mut().have_data = true);
        }
        sent
    }

    /// Drop the partially filled half. A completed half stays available.
    pub fn reset(&self) {
        self.inner.lock(|b| {
            let mut b = b.borrow_mut();
            let filling = b.filling;
            b.crc[filling] = SEED;
            b.cursor = 0;
        })
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
