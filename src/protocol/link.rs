//! Hand-off of received USB chunks to the parser task.
//!
//! The transport copies a chunk into the shared buffer and queues its length;
//! it then waits until the parser has released the buffer before the next
//! chunk, so at most one chunk is ever outstanding and the host is throttled
//! by USB flow control rather than by dropping bytes.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::state::{ErrorCode, ErrorFlags};

/// Largest chunk accepted in one delivery (one full-speed USB packet).
pub const CHUNK_LEN: usize = 64;
const QUEUE_DEPTH: usize = 10;

pub struct RxLink {
    chunk: Mutex<CriticalSectionRawMutex, RefCell<[u8; CHUNK_LEN]>>,
    lengths: Channel<CriticalSectionRawMutex, usize, QUEUE_DEPTH>,
    released: Signal<CriticalSectionRawMutex, ()>,
    busy: AtomicBool,
}

impl RxLink {
    pub const fn new() -> Self {
        Self {
            chunk: Mutex::new(RefCell::new([0; CHUNK_LEN])),
            lengths: Channel::new(),
            released: Signal::new(),
            busy: AtomicBool::new(false),
        }
    }

    /// Transport side. Longer input is cut to [`CHUNK_LEN`] and reported as a
    /// parser error.
    pub async fn deliver(&self, bytes: &[u8], errors: &ErrorFlags) {
        while self.busy.load(Ordering::Acquire) {
            self.released.wait().await;
        }

        let n = bytes.len().min(CHUNK_LEN);
        if n < bytes.len() {
            warn!("rx chunk of {} bytes truncated", bytes.len());
            errors.raise(ErrorCode::ParserError);
        }
        self.chunk
            .lock(|c| c.borrow_mut()[..n].copy_from_slice(&bytes[..n]));
        self.busy.store(true, Ordering::Release);
        self.lengths.send(n).await;
    }

    /// Parser side. Waits for a chunk, runs `f` on it and releases the
    /// transport.
    pub async fn process<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let n = self.lengths.receive().await;
        let mut local = [0u8; CHUNK_LEN];
        self.chunk.lock(|c| local[..n].copy_from_slice(&c.borrow()[..n]));

        let result = f(&local[..n]);

        self.busy.store(false, Ordering::Release);
        self.released.signal(());
        result
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Default for RxLink {
    fn default() -> Self {
        Self::new()
    }
}
