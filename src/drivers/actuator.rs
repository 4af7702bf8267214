use crate::hal::{Calibration, Hal};

/// Full scale of the 10-bit heater DAC.
pub const ACTUATOR_MAX_CODE: u16 = 1023;

/// Heater drive output. Remembers the last voltage it accepted.
pub struct Actuator {
    last: f32,
}

impl Actuator {
    pub const fn new() -> Self {
        Self { last: 0.0 }
    }

    /// Converts `voltage` to a DAC code and writes it. Non-finite requests are
    /// dropped without touching the hardware.
    pub fn set<H: Hal>(&mut self, hal: &mut H, voltage: f32, cal: &Calibration) -> bool {
        if !voltage.is_finite() {
            error!("refusing non-finite heater voltage, holding {} V", self.last);
            return false;
        }
        self.last = voltage;
        let code = voltage * cal.gain + 0.5 + cal.offset;
        let code = code.clamp(0.0, ACTUATOR_MAX_CODE as f32) as u16;
        trace!("dac: {} V -> {}", voltage, code);
        hal.write_actuator_code(code);
        true
    }

    pub fn get(&self) -> f32 {
        self.last
    }
}

impl Default for Actuator {
    fn default() -> Self {
        Self::new()
    }
}
