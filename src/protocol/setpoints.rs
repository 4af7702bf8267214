//! Double-buffered setpoint cycle.
//!
//! The host streams a whole cycle into the staging half; the halves swap only
//! once the last byte has arrived, so the loop never runs on a partial load.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Setpoints per cycle, one consumed per control step.
pub const CYCLE_LENGTH: usize = 600;
pub const CYCLE_BYTES: usize = CYCLE_LENGTH * 4;

struct Buffers {
    data: [[u8; CYCLE_BYTES]; 2],
    active: usize,
    /// Next slot to pop from the active half.
    cursor: usize,
}

pub struct SetpointStream {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Buffers>>,
}

impl SetpointStream {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Buffers {
                data: [[0; CYCLE_BYTES]; 2],
                active: 0,
                cursor: 0,
            })),
        }
    }

    /// Store one payload byte into the staging half. Out-of-range offsets are
    /// ignored.
    pub fn write_staging(&self, offset: usize, byte: u8) {
        self.inner.lock(|b| {
            let mut b = b.borrow_mut();
            let staging = 1 - b.active;
            if let Some(slot) = b.data[staging].get_mut(offset) {
                *slot = byte;
            }
        })
    }

    /// Make the staging half active and restart consumption from slot 0.
    pub fn commit(&self) {
        self.inner.lock(|b| {
            let mut b = b.borrow_mut();
            b.active = 1 - b.active;
            b.cursor = 0;
        });
        debug!("setpoint cycle swapped");
    }

    /// Pop the next setpoint, wrapping at the end of the cycle.
    pub fn next(&self) -> f32 {
        self.inner.lock(|b| {
            let mut b = b.borrow_mut();
            let at = b.cursor * 4;
            let active = b.active;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&b.data[active][at..at + 4]);
            b.cursor = (b.cursor + 1) % CYCLE_LENGTH;
            f32::from_le_bytes(raw)
        })
    }

    pub fn reset(&self) {
        self.inner.lock(|b| b.borrow_mut().cursor = 0)
    }
}

impl Default for SetpointStream {
    fn default() -> Self {
        Self::new()
    }
}
