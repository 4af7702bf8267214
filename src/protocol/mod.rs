//! Framed binary protocol spoken with the host.
//!
//! A frame is `PREAMBLE | cmd | payload | seq | crc32 (LE) | POSTAMBLE`, with
//! every reserved byte inside the frame escaped. The receiver parses one byte
//! at a time and answers through the same [`frame::FrameWriter`] that sends the
//! telemetry buffers.

pub mod command;
pub mod frame;
pub mod link;
pub mod receiver;
pub mod setpoints;
pub mod transmitter;
