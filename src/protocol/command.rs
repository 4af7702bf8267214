/// Sentinel written raw, outside any frame, in reply to `INFO`.
pub const INFO_SENTINEL: f32 = 100.1;

// Standard response codes, sent as the one-byte payload of a reply frame that
// echoes the command id.
pub const RSP_OK: u8 = 0x00;
pub const RSP_ALREADY_IN_STATE: u8 = 0x01;
pub const RSP_NO_DATA: u8 = 0x01;
pub const RSP_SET_FAILED: u8 = 0x01;
pub const RSP_STATE_SWITCH_ERROR: u8 = 0x02;
pub const RSP_BAD_CRC: u8 = 0xFE;

use super::setpoints::CYCLE_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    Stop = 0x01,
    Start = 0x02,
    GetData = 0x03,
    GetError = 0x04,
    SetHeaterParams = 0x05,
    SetMeasureParams = 0x06,
    SetTempCycle = 0x07,
    GetHaveData = 0x08,
    SetPidParams = 0x09,
    SetAdcCal = 0x0A,
    SetDacCal = 0x0B,
    SaveNvs = 0x0C,
    GetNvs = 0x0D,
    EnablePidDbg = 0x0E,
    FactoryReset = 0x0F,
    Info = b'I',
}

/// Largest payload that is buffered by the receiver. `SET_TEMP_CYCLE` is
/// written straight into the setpoint staging buffer instead.
pub const MAX_ARGS_LEN: usize = 28;

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let cmd = match byte {
            0x01 => Self::Stop,
            0x02 => Self::Start,
            0x03 => Self::GetData,
            0x04 => Self::GetError,
            0x05 => Self::SetHeaterParams,
            0x06 => Self::SetMeasureParams,
            0x07 => Self::SetTempCycle,
            0x08 => Self::GetHaveData,
            0x09 => Self::SetPidParams,
            0x0A => Self::SetAdcCal,
            0x0B => Self::SetDacCal,
            0x0C => Self::SaveNvs,
            0x0D => Self::GetNvs,
            0x0E => Self::EnablePidDbg,
            0x0F => Self::FactoryReset,
            b'I' => Self::Info,
            _ => return None,
        };
        Some(cmd)
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Fixed payload size in bytes.
    pub const fn payload_len(self) -> usize {
        match self {
            Self::SetHeaterParams => 3 * 4,
            Self::SetMeasureParams => 4,
            Self::SetTempCycle => CYCLE_BYTES,
            Self::SetPidParams => 7 * 4,
            Self::SetAdcCal => 1 + 2 * 4,
            Self::SetDacCal => 2 * 4,
            _ => 0,
        }
    }
}
