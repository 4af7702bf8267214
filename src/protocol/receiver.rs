//! Byte-at-a-time frame parser and command dispatcher.
//!
//! Commands take effect as soon as their last payload byte arrives; the
//! sequence and CRC that follow only decide which reply is sent. Data commands
//! (`GET_DATA`, `GET_ERROR`, `GET_NVS`) reply immediately with their own frame.

use super::command::*;
use super::frame::{FrameWriter, Transport, ESCAPE, POSTAMBLE, PREAMBLE};
use crate::drivers::crc::Crc32;
use crate::hal::Channel;
use crate::params::{read_heater, read_pid, LeReader, NvStorage, ParamStore, BLOB_LEN};
use crate::state::{ErrorCode, Shared, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParserState {
    SeekingPreamble,
    ReadingCommand,
    ReadingArguments,
    ReadingSequence,
    ReadingCrc,
    FrameComplete,
}

pub struct Receiver<'a, S: NvStorage> {
    shared: &'a Shared,
    store: ParamStore<'a, S>,
    writer: FrameWriter,

    state: ParserState,
    escaped: bool,
    command: Option<Command>,
    /// Payload index while reading arguments, CRC byte index after that.
    index: usize,
    args: [u8; MAX_ARGS_LEN],
    crc: Crc32,
    expected_crc: [u8; 4],
    crc_ok: bool,
    last_seq: u8,
    response: Option<u8>,
}

impl<'a, S: NvStorage> Receiver<'a, S> {
    pub fn new(shared: &'a Shared, store: ParamStore<'a, S>) -> Self {
        Self {
            shared,
            store,
            writer: FrameWriter::new(),
            state: ParserState::SeekingPreamble,
            escaped: false,
            command: None,
            index: 0,
            args: [0; MAX_ARGS_LEN],
            crc: Crc32::new(),
            expected_crc: [0; 4],
            crc_ok: true,
            last_seq: 0,
            response: None,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn feed<T: Transport + ?Sized>(&mut self, bytes: &[u8], tx: &mut T) {
        for &b in bytes {
            self.push_byte(b, tx);
        }
    }

    pub fn push_byte<T: Transport + ?Sized>(&mut self, byte: u8, tx: &mut T) {
        if self.escaped {
            self.escaped = false;
            self.consume(byte, tx);
            return;
        }

        match byte {
            ESCAPE => self.escaped = true,
            PREAMBLE => {
                if self.state == ParserState::FrameComplete {
                    self.malformed();
                }
                self.begin_frame();
            }
            POSTAMBLE => match self.state {
                ParserState::FrameComplete => self.state = ParserState::SeekingPreamble,
                ParserState::SeekingPreamble => {}
                _ => {
                    self.malformed();
                    self.abort();
                }
            },
            _ => self.consume(byte, tx),
        }
    }

    fn consume<T: Transport + ?Sized>(&mut self, byte: u8, tx: &mut T) {
        match self.state {
            ParserState::SeekingPreamble => {}
            ParserState::ReadingCommand => self.on_command(byte, tx),
            ParserState::ReadingArguments => self.on_argument(byte, tx),
            ParserState::ReadingSequence => self.on_sequence(byte),
            ParserState::ReadingCrc => self.on_crc(byte, tx),
            ParserState::FrameComplete => {
                self.malformed();
                self.abort();
            }
        }
    }

    fn begin_frame(&mut self) {
        self.state = ParserState::ReadingCommand;
        self.crc = Crc32::new();
        self.command = None;
        self.response = None;
        self.index = 0;
        self.crc_ok = true;
    }

    fn abort(&mut self) {
        self.state = ParserState::SeekingPreamble;
        self.command = None;
        self.response = None;
    }

    fn malformed(&self) {
        warn!("malformed frame in state {}", self.state);
        self.shared.errors.raise(ErrorCode::MalformedFrame);
    }

    fn on_command<T: Transport + ?Sized>(&mut self, byte: u8, tx: &mut T) {
        self.crc = self.crc.fold_byte(byte);
        let Some(cmd) = Command::from_byte(byte) else {
            warn!("unknown command {=u8:#x}", byte);
            self.shared.errors.raise(ErrorCode::UnknownCommand);
            self.abort();
            return;
        };

        self.command = Some(cmd);
        self.index = 0;
        if cmd.payload_len() == 0 {
            self.execute(cmd, tx);
            self.state = ParserState::ReadingSequence;
        } else {
            self.state = ParserState::ReadingArguments;
        }
    }

    fn on_argument<T: Transport + ?Sized>(&mut self, byte: u8, tx: &mut T) {
        let Some(cmd) = self.command else {
            self.abort();
            return;
        };
        self.crc = self.crc.fold_byte(byte);

        if cmd == Command::SetTempCycle {
            self.shared.setpoints.write_staging(self.index, byte);
        } else if let Some(slot) = self.args.get_mut(self.index) {
            *slot = byte;
        }

        if self.index + 1 == cmd.payload_len() {
            self.execute(cmd, tx);
            self.state = ParserState::ReadingSequence;
        } else {
            self.index += 1;
        }
    }

    fn on_sequence(&mut self, seq: u8) {
        let expected = self.last_seq.wrapping_add(1);
        if seq != expected {
            warn!("missed packet: expected seq {=u8}, got {=u8}", expected, seq);
            self.shared.errors.raise(ErrorCode::MissedPacket);
        }
        self.last_seq = seq;

        self.expected_crc = self.crc.fold_byte(seq).finish().to_le_bytes();
        self.index = 0;
        self.state = ParserState::ReadingCrc;
    }

    fn on_crc<T: Transport + ?Sized>(&mut self, byte: u8, tx: &mut T) {
        if self.expected_crc.get(self.index) != Some(&byte) {
            self.crc_ok = false;
        }
        self.index += 1;
        if self.index < self.expected_crc.len() {
            return;
        }

        if !self.crc_ok {
            warn!("bad crc on command {}", self.command);
            self.shared.errors.raise(ErrorCode::BadCrc);
            if self.response.is_some() {
                self.response = Some(RSP_BAD_CRC);
            }
        }
        if let (Some(cmd), Some(code)) = (self.command, self.response.take()) {
            self.writer.send(tx, cmd.id(), &[code]);
        }
        self.state = ParserState::FrameComplete;
    }

    fn execute<T: Transport + ?Sized>(&mut self, cmd: Command, tx: &mut T) {
        let shared = self.shared;
        let len = cmd.payload_len().min(MAX_ARGS_LEN);
        let mut args = LeReader::new(&self.args[..len]);

        let response = match cmd {
            Command::Stop => {
                let res = shared.run.stop();
                shared.setpoints.reset();
                shared.telemetry.reset();
                match res {
                    Transition::Switched => {
                        info!("controller stopped");
                        RSP_OK
                    }
                    _ => RSP_ALREADY_IN_STATE,
                }
            }
            Command::Start => match shared.run.start() {
                Transition::Switched => {
                    info!("controller started");
                    RSP_OK
                }
                Transition::AlreadyThere => RSP_ALREADY_IN_STATE,
                Transition::Refused => {
                    warn!("start refused, init failed");
                    RSP_STATE_SWITCH_ERROR
                }
            },
            Command::GetData => {
                shared.telemetry.send_full_buffer(&mut self.writer, tx);
                return;
            }
            Command::GetError => {
                let bits = shared.errors.take();
                self.writer.send(tx, cmd.id(), &bits.to_le_bytes());
                return;
            }
            Command::GetNvs => {
                let mut blob = [0u8; BLOB_LEN];
                match self.store.dump(&mut blob) {
                    Ok(()) => {
                        self.writer.send(tx, cmd.id(), &blob);
                        return;
                    }
                    Err(e) => {
                        warn!("reading stored parameters failed: {}", e);
                        RSP_SET_FAILED
                    }
                }
            }
            Command::Info => {
                tx.write(&INFO_SENTINEL.to_le_bytes());
                return;
            }
            Command::SetHeaterParams => {
                self.store.set_heater_params(read_heater(&mut args));
                RSP_OK
            }
            Command::SetMeasureParams => {
                self.store.set_ref_resistance(args.f32());
                RSP_OK
            }
            Command::SetTempCycle => {
                shared.setpoints.commit();
                RSP_OK
            }
            Command::GetHaveData => match shared.telemetry.have_data() {
                true => RSP_OK,
                false => RSP_NO_DATA,
            },
            Command::SetPidParams => {
                self.store.set_pid_params(read_pid(&mut args));
                RSP_OK
            }
            Command::SetAdcCal => {
                let index = args.u8();
                let cal = args.calibration();
                match Channel::from_index(index) {
                    Some(channel) => {
                        self.store.set_adc_calibration(channel, cal);
                        RSP_OK
                    }
                    None => {
                        warn!("no ADC channel {=u8}", index);
                        RSP_SET_FAILED
                    }
                }
            }
            Command::SetDacCal => {
                self.store.set_dac_calibration(args.calibration());
                RSP_OK
            }
            Command::SaveNvs => match self.store.save() {
                Ok(()) => RSP_OK,
                Err(e) => {
                    warn!("saving parameters failed: {}", e);
                    RSP_SET_FAILED
                }
            },
            Command::EnablePidDbg => {
                let on = self.store.toggle_pid_debug();
                info!("PI debug output {}", if on { "on" } else { "off" });
                RSP_OK
            }
            Command::FactoryReset => match self.store.factory_reset() {
                Ok(()) => RSP_OK,
                Err(e) => {
                    warn!("factory reset not persisted: {}", e);
                    RSP_SET_FAILED
                }
            },
        };
        self.response = Some(response);
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use rstest::rstest;

    use super::*;
    use crate::params::mock::RamStorage;
    use crate::params::{decode, Params};
    use crate::protocol::frame::testing::{decode as decode_frames, host_frame, wrap, Decoded};
    use crate::protocol::setpoints::CYCLE_LENGTH;
    use crate::protocol::transmitter::TELEMETRY_BYTES;

    /// Host side of a session: numbers frames and collects device output.
    struct Host<'a> {
        rx: Receiver<'a, RamStorage>,
        seq: u8,
        out: Vec<u8>,
    }

    impl<'a> Host<'a> {
        fn new(shared: &'a Shared) -> Self {
            let store = ParamStore::new(&shared.params, RamStorage::new());
            Self {
                rx: Receiver::new(shared, store),
                seq: 0,
                out: Vec::new(),
            }
        }

        fn send(&mut self, cmd: Command, payload: &[u8]) -> Vec<Decoded> {
            self.seq = self.seq.wrapping_add(1);
            let frame = host_frame(cmd.id(), payload, self.seq);
            self.raw(&frame)
        }

        fn raw(&mut self, bytes: &[u8]) -> Vec<Decoded> {
            self.out.clear();
            self.rx.feed(bytes, &mut self.out);
            decode_frames(&self.out)
        }

        fn reply(&mut self, cmd: Command, payload: &[u8]) -> u8 {
            let frames = self.send(cmd, payload);
            assert_eq!(frames.len(), 1, "{frames:?}");
            assert_eq!(frames[0].cmd, cmd.id());
            assert!(frames[0].crc_ok);
            frames[0].payload[0]
        }
    }

    #[test]
    fn stop_while_stopped_is_already_in_state() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        assert_eq!(host.reply(Command::Stop, &[]), RSP_ALREADY_IN_STATE);
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn start_and_stop_switch_the_loop() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        assert_eq!(host.reply(Command::Start, &[]), RSP_OK);
        assert!(shared.run.is_running());
        assert_eq!(host.reply(Command::Start, &[]), RSP_ALREADY_IN_STATE);
        assert_eq!(host.reply(Command::Stop, &[]), RSP_OK);
        assert!(!shared.run.is_running());
    }

    #[test]
    fn replies_carry_their_own_sequence() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let seqs: Vec<u8> = (0..3)
            .map(|_| host.send(Command::GetHaveData, &[])[0].seq)
            .collect();
        assert_eq!(seqs, [0, 1, 2]);
    }

    #[test]
    fn start_after_init_failure_is_refused() {
        let shared = Shared::new();
        shared.run.inhibit();
        let mut host = Host::new(&shared);
        assert_eq!(host.reply(Command::Start, &[]), RSP_STATE_SWITCH_ERROR);
        assert!(!shared.run.is_running());
    }

    #[rstest]
    #[case(Command::SetHeaterParams, 12)]
    #[case(Command::SetMeasureParams, 4)]
    #[case(Command::SetTempCycle, 2400)]
    #[case(Command::SetPidParams, 28)]
    #[case(Command::SetAdcCal, 9)]
    #[case(Command::SetDacCal, 8)]
    fn payload_of_declared_size_reaches_sequence(#[case] cmd: Command, #[case] len: usize) {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let payload = std::vec![0u8; len];

        // Ids and zero payloads need no stuffing, so the head is verbatim.
        let mut head = std::vec![PREAMBLE, cmd.id()];
        head.extend_from_slice(&payload);
        let frame = host_frame(cmd.id(), &payload, 1);
        let tail = frame[head.len()..].to_vec();

        let (short, last) = head.split_at(head.len() - 1);
        host.raw(short);
        assert_eq!(host.rx.state(), ParserState::ReadingArguments);
        host.raw(last);
        assert_eq!(host.rx.state(), ParserState::ReadingSequence);

        let frames = host.raw(&tail);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, [RSP_OK]);
        assert_eq!(host.rx.state(), ParserState::SeekingPreamble);
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn corrupted_crc_is_flagged_and_answered() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);

        let mut body = std::vec![Command::SetMeasureParams.id()];
        body.extend_from_slice(&470.0f32.to_le_bytes());
        body.push(1);
        let crc = Crc32::new().fold(&body).finish() ^ 0x0000_0100;
        body.extend_from_slice(&crc.to_le_bytes());

        let frames = host.raw(&wrap(&body));
        assert_eq!(frames[0].payload, [RSP_BAD_CRC]);
        assert!(shared.errors.contains(ErrorCode::BadCrc));
        // The command itself already took effect.
        assert_eq!(shared.params.get().ref_resistance, 470.0);
    }

    #[test]
    fn any_corrupted_body_byte_fails_crc() {
        let payload: Vec<u8> = [0.02f32, 50.0, 0.1, 0.003, 1.0, 0.1, 295.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut body = std::vec![Command::SetPidParams.id()];
        body.extend_from_slice(&payload);
        body.push(1);
        let crc = Crc32::new().fold(&body).finish();
        body.extend_from_slice(&crc.to_le_bytes());

        // Every payload byte and the sequence byte.
        for i in 1..=payload.len() + 1 {
            let shared = Shared::new();
            let mut host = Host::new(&shared);
            let mut bad = body.clone();
            bad[i] ^= 0x20;

            let frames = host.raw(&wrap(&bad));
            assert_eq!(frames.len(), 1, "byte {i}");
            assert_eq!(frames[0].payload, [RSP_BAD_CRC], "byte {i}");
            assert!(shared.errors.contains(ErrorCode::BadCrc), "byte {i}");
        }
    }

    #[test]
    fn sequence_gap_raises_missed_packet() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        for seq in [1u8, 2] {
            host.raw(&host_frame(Command::GetHaveData.id(), &[], seq));
        }
        assert_eq!(shared.errors.peek(), 0);

        host.raw(&host_frame(Command::GetHaveData.id(), &[], 4));
        assert_eq!(shared.errors.take(), ErrorCode::MissedPacket as u32);

        // Resynchronised on 4.
        host.raw(&host_frame(Command::GetHaveData.id(), &[], 5));
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn unknown_command_aborts_the_frame() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        host.seq = 1;
        let frames = host.raw(&host_frame(0x42, &[], 1));
        assert!(frames.is_empty());
        assert_eq!(shared.errors.take(), ErrorCode::UnknownCommand as u32);
        assert_eq!(host.rx.state(), ParserState::SeekingPreamble);

        // The aborted frame's sequence byte was never read, so the next
        // frame looks like a gap.
        assert_eq!(host.reply(Command::GetHaveData, &[]), RSP_NO_DATA);
        assert_eq!(shared.errors.take(), ErrorCode::MissedPacket as u32);
        assert_eq!(host.reply(Command::GetHaveData, &[]), RSP_NO_DATA);
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn postamble_inside_a_frame_is_malformed() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let frames = host.raw(&[PREAMBLE, Command::GetHaveData.id(), POSTAMBLE]);
        assert!(frames.is_empty());
        assert_eq!(shared.errors.take(), ErrorCode::MalformedFrame as u32);

        // A stray postamble between frames is not an error.
        host.raw(&[POSTAMBLE]);
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn garbage_after_crc_is_malformed() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let mut frame = host_frame(Command::GetHaveData.id(), &[], 1);
        frame.pop();
        frame.push(0x00);
        let frames = host.raw(&frame);
        // The reply is out before the trailer is seen.
        assert_eq!(frames.len(), 1);
        assert_eq!(shared.errors.take(), ErrorCode::MalformedFrame as u32);
        assert_eq!(host.rx.state(), ParserState::SeekingPreamble);
    }

    #[test]
    fn preamble_mid_frame_restarts() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let mut bytes = std::vec![PREAMBLE, Command::SetMeasureParams.id(), 0x00, 0x00];
        bytes.extend(host_frame(Command::GetHaveData.id(), &[], 1));
        let frames = host.raw(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cmd, Command::GetHaveData.id());
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn reserved_bytes_in_payload_are_data() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let value = f32::from_le_bytes([PREAMBLE, POSTAMBLE, ESCAPE, 0x42]);
        assert_eq!(host.reply(Command::SetMeasureParams, &value.to_le_bytes()), RSP_OK);
        assert_eq!(shared.params.get().ref_resistance, value);
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn temp_cycle_swaps_on_the_last_byte() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let payload: Vec<u8> = (0..CYCLE_LENGTH)
            .flat_map(|i| (400.0 + i as f32).to_le_bytes())
            .collect();

        // A load cut short by a new preamble never becomes active.
        let mut partial = host_frame(Command::SetTempCycle.id(), &payload, 1);
        partial.truncate(100);
        host.seq = 1;
        host.raw(&partial);
        assert_eq!(host.reply(Command::GetHaveData, &[]), RSP_NO_DATA);
        assert_eq!(shared.errors.take(), ErrorCode::MissedPacket as u32);
        assert_eq!(shared.setpoints.next(), 0.0);

        assert_eq!(host.reply(Command::SetTempCycle, &payload), RSP_OK);
        assert_eq!(shared.setpoints.next(), 400.0);
        assert_eq!(shared.setpoints.next(), 401.0);
    }

    #[test]
    fn get_error_drains_the_flags() {
        let shared = Shared::new();
        shared.errors.raise(ErrorCode::Heater);
        shared.errors.raise(ErrorCode::Measure);
        let mut host = Host::new(&shared);

        let frames = host.send(Command::GetError, &[]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, 3u32.to_le_bytes());
        assert_eq!(shared.errors.peek(), 0);
    }

    #[test]
    fn get_data_sends_the_full_buffer() {
        let shared = Shared::new();
        for i in 0..CYCLE_LENGTH {
            shared.telemetry.enqueue(500.0, i as f32);
        }
        let mut host = Host::new(&shared);
        assert_eq!(host.reply(Command::GetHaveData, &[]), RSP_OK);

        let frames = host.send(Command::GetData, &[]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].crc_ok);
        assert_eq!(frames[0].payload.len(), TELEMETRY_BYTES);
        assert_eq!(host.reply(Command::GetHaveData, &[]), RSP_NO_DATA);
    }

    #[test]
    fn info_writes_raw_sentinel() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let frames = host.send(Command::Info, &[]);
        assert!(frames.is_empty());
        assert_eq!(host.out, 100.1f32.to_le_bytes());
    }

    #[test]
    fn adc_calibration_targets_one_channel() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let mut payload = std::vec![Channel::VDiv as u8];
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        payload.extend_from_slice(&0.25f32.to_le_bytes());
        assert_eq!(host.reply(Command::SetAdcCal, &payload), RSP_OK);

        let p = shared.params.get();
        assert_eq!(p.adc[Channel::VDiv.index()].gain, 1.5);
        assert_eq!(p.adc[Channel::VDiv.index()].offset, 0.25);
        assert_eq!(p.adc[Channel::VRef.index()], Params::DEFAULT.adc[Channel::VRef.index()]);

        payload[0] = 9;
        assert_eq!(host.reply(Command::SetAdcCal, &payload), RSP_SET_FAILED);
    }

    #[test]
    fn pid_params_arrive_in_wire_order() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        let payload: Vec<u8> = [0.02f32, 50.0, 0.1, 0.003, 1.0, 0.1, 295.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(host.reply(Command::SetPidParams, &payload), RSP_OK);
        let pid = shared.params.get().pid;
        assert_eq!(pid.k_i, 0.02);
        assert_eq!(pid.lim_i, 50.0);
        assert_eq!(pid.ambient_temp, 295.0);
    }

    #[test]
    fn saved_parameters_come_back_through_get_nvs() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        assert_eq!(host.reply(Command::SetMeasureParams, &22_000.0f32.to_le_bytes()), RSP_OK);
        assert_eq!(host.reply(Command::SaveNvs, &[]), RSP_OK);

        let frames = host.send(Command::GetNvs, &[]);
        assert_eq!(frames.len(), 1);
        let blob: [u8; BLOB_LEN] = frames[0].payload.as_slice().try_into().unwrap();
        assert_eq!(decode(&blob).unwrap().ref_resistance, 22_000.0);

        assert_eq!(host.reply(Command::FactoryReset, &[]), RSP_OK);
        assert_eq!(shared.params.get(), Params::DEFAULT);
    }

    #[test]
    fn pid_debug_toggle_answers_ok() {
        let shared = Shared::new();
        let mut host = Host::new(&shared);
        assert_eq!(host.reply(Command::EnablePidDbg, &[]), RSP_OK);
        assert!(shared.params.get().pid_debug);
    }
}
