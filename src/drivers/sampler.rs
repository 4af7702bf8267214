use crate::drivers::average::RollingAverage;
use crate::hal::{Calibration, Channel, Hal};

/// Longest averaging window the sampler can hold.
pub const MAX_AVERAGING_LEN: usize = 64;

/// Calibrated values of the four sensing channels, volts and amps.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Readings {
    pub i_heater: f32,
    pub v_heater: f32,
    pub v_ref: f32,
    pub v_div: f32,
}

pub struct Sampler {
    averages: [RollingAverage<MAX_AVERAGING_LEN>; 4],
}

impl Sampler {
    pub fn new(averaging_len: usize) -> Self {
        Self {
            averages: core::array::from_fn(|_| RollingAverage::new(averaging_len)),
        }
    }

    /// Reads one code per sensing channel and returns the calibrated averages.
    pub fn sample<H: Hal>(&mut self, hal: &mut H, cals: &[Calibration; Channel::COUNT]) -> Readings {
        let mut values = [0.0f32; 4];
        for (i, ch) in Channel::SENSING.iter().enumerate() {
            let code = hal.read_channel(*ch);
            let average = self.averages[i].push(code as u32);
            values[i] = cals[ch.index()].apply_code(average);
        }

        Readings {
            i_heater: values[0],
            v_heater: values[1],
            v_ref: values[2],
            v_div: values[3],
        }
    }
}
