//! State shared between the control, parser and transport tasks.
//!
//! Everything here is built by `const fn new()` so the firmware can keep it in
//! plain `static`s and hand `&'static` references to the tasks.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::params::SharedParams;
use crate::protocol::link::RxLink;
use crate::protocol::setpoints::SetpointStream;
use crate::protocol::transmitter::Telemetry;

/// Fault kinds, one bit each in the flag set reported by `GET_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum ErrorCode {
    /// Non-finite control output.
    Heater = 1 << 0,
    /// Measurement outside the plausible range.
    Measure = 1 << 1,
    /// A channel failed to initialize at startup; the loop will not start.
    SoftwareInit = 1 << 2,
    UnknownCommand = 1 << 3,
    /// Sequence byte was not the previous one plus one.
    MissedPacket = 1 << 4,
    ParserError = 1 << 5,
    /// Preamble/postamble out of the expected order.
    MalformedFrame = 1 << 6,
    BadCrc = 1 << 7,
}

/// OR-accumulated fault bits, drained atomically by the host.
pub struct ErrorFlags {
    bits: AtomicU32,
}

impl ErrorFlags {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    pub fn raise(&self, code: ErrorCode) {
        self.bits.fetch_or(code as u32, Ordering::AcqRel);
    }

    pub fn peek(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.peek() & code as u32 != 0
    }

    /// Read and clear in one step.
    pub fn take(&self) -> u32 {
        self.bits.swap(0, Ordering::AcqRel)
    }
}

impl Default for ErrorFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a START/STOP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    Switched,
    AlreadyThere,
    Refused,
}

/// Run/stop flag of the control loop. STOP is cooperative: the loop looks at
/// the flag once per tick.
pub struct RunState {
    running: AtomicBool,
    init_failed: AtomicBool,
}

impl RunState {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            init_failed: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(&self) -> Transition {
        if self.init_failed.load(Ordering::Acquire) {
            return Transition::Refused;
        }
        match self.running.swap(true, Ordering::AcqRel) {
            true => Transition::AlreadyThere,
            false => Transition::Switched,
        }
    }

    pub fn stop(&self) -> Transition {
        match self.running.swap(false, Ordering::AcqRel) {
            true => Transition::Switched,
            false => Transition::AlreadyThere,
        }
    }

    /// Latch a startup failure: the loop is stopped and can no longer start.
    pub fn inhibit(&self) {
        self.init_failed.store(true, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    pub fn is_inhibited(&self) -> bool {
        self.init_failed.load(Ordering::Acquire)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the control loop and the protocol engine exchange.
pub struct Shared {
    pub errors: ErrorFlags,
    pub run: RunState,
    pub params: SharedParams,
    pub setpoints: SetpointStream,
    pub telemetry: Telemetry,
    pub link: RxLink,
}

impl Shared {
    pub const fn new() -> Self {
        Self {
            errors: ErrorFlags::new(),
            run: RunState::new(),
            params: SharedParams::new(),
            setpoints: SetpointStream::new(),
            telemetry: Telemetry::new(),
            link: RxLink::new(),
        }
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new()
    }
}
