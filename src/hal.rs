//! Board access seen from the core.
//!
//! The firmware implements [`Hal`] on top of the STM32 ADC, GPIO and the DAC
//! shift register; tests implement it with plain structs.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// ADC codes per volt at the ADC pin (12 bit, 3.3 V reference).
pub const ADC_CODES_PER_VOLT: f32 = 4095.0 / 3.3;

/// Analog inputs, in the order they are stored in the parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    /// Heater current (shunt amplifier output).
    IHeater = 0,
    /// Heater voltage monitor.
    VHeaterMon = 1,
    /// Voltage across the bridge reference resistor.
    VRef = 2,
    /// Bridge divider tap.
    VDiv = 3,
    BatteryVoltage = 4,
    BatteryTemp = 5,
}

impl Channel {
    pub const COUNT: usize = 6;
    /// Channels consumed by the control loop.
    pub const SENSING: [Channel; 4] = [
        Channel::IHeater,
        Channel::VHeaterMon,
        Channel::VRef,
        Channel::VDiv,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::IHeater),
            1 => Some(Self::VHeaterMon),
            2 => Some(Self::VRef),
            3 => Some(Self::VDiv),
            4 => Some(Self::BatteryVoltage),
            5 => Some(Self::BatteryTemp),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DigitalInput {
    UsbDetected,
    ChargerEmergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DigitalOutput {
    ChargeEnable,
    Led,
}

/// Linear correction `value * gain + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub gain: f32,
    pub offset: f32,
}

impl Calibration {
    pub const IDENTITY: Self = Self { gain: 1.0, offset: 0.0 };

    pub const fn new(gain: f32, offset: f32) -> Self {
        Self { gain, offset }
    }

    /// Averaged ADC code to engineering units.
    pub fn apply_code(&self, code: f32) -> f32 {
        code / ADC_CODES_PER_VOLT * self.gain + self.offset
    }
}

pub trait Hal {
    /// Bring up the analog front end. `false` means at least one channel could
    /// not be calibrated and the controller must not run.
    fn init(&mut self) -> bool;
    fn read_channel(&mut self, channel: Channel) -> u16;
    fn write_actuator_code(&mut self, code: u16);
    fn digital_input(&mut self, input: DigitalInput) -> bool;
    fn set_digital_output(&mut self, output: DigitalOutput, on: bool);
}

/// A board HAL shared between the control and battery tasks. Every call takes
/// the lock for its own duration only.
pub struct SharedHal<H: 'static> {
    inner: &'static Mutex<CriticalSectionRawMutex, RefCell<H>>,
}

impl<H> SharedHal<H> {
    pub fn new(inner: &'static Mutex<CriticalSectionRawMutex, RefCell<H>>) -> Self {
        Self { inner }
    }
}

impl<H> Clone for SharedHal<H> {
    fn clone(&self) -> Self {
        Self { inner: self.inner }
    }
}

impl<H: Hal> Hal for SharedHal<H> {
    fn init(&mut self) -> bool {
        self.inner.lock(|h| h.borrow_mut().init())
    }

    fn read_channel(&mut self, channel: Channel) -> u16 {
        self.inner.lock(|h| h.borrow_mut().read_channel(channel))
    }

    fn write_actuator_code(&mut self, code: u16) {
        self.inner.lock(|h| h.borrow_mut().write_actuator_code(code))
    }

    fn digital_input(&mut self, input: DigitalInput) -> bool {
        self.inner.lock(|h| h.borrow_mut().digital_input(input))
    }

    fn set_digital_output(&mut self, output: DigitalOutput, on: bool) {
        self.inner.lock(|h| h.borrow_mut().set_digital_output(output, on))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Scriptable HAL used across the crate's tests.
    pub struct MockHal {
        pub init_ok: bool,
        pub codes: [u16; Channel::COUNT],
        pub actuator_writes: std::vec::Vec<u16>,
        pub usb: bool,
        pub emergency: bool,
        pub charge_enabled: Option<bool>,
        pub led: Option<bool>,
    }

    impl MockHal {
        pub fn new() -> Self {
            Self {
                init_ok: true,
                codes: [0; Channel::COUNT],
                actuator_writes: std::vec::Vec::new(),
                usb: false,
                emergency: false,
                charge_enabled: None,
                led: None,
            }
        }

        /// Code that reads back as `volts` through an identity calibration.
        pub fn code_for(volts: f32) -> u16 {
            (volts * ADC_CODES_PER_VOLT + 0.5) as u16
        }
    }

    impl Hal for MockHal {
        fn init(&mut self) -> bool {
            self.init_ok
        }

        fn read_channel(&mut self, channel: Channel) -> u16 {
            self.codes[channel.index()]
        }

        fn write_actuator_code(&mut self, code: u16) {
            self.actuator_writes.push(code);
        }

        fn digital_input(&mut self, input: DigitalInput) -> bool {
            match input {
                DigitalInput::UsbDetected => self.usb,
                DigitalInput::ChargerEmergency => self.emergency,
            }
        }

        fn set_digital_output(&mut self, output: DigitalOutput, on: bool) {
            match output {
                DigitalOutput::ChargeEnable => self.charge_enabled = Some(on),
                DigitalOutput::Led => self.led = Some(on),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_index_roundtrip() {
        for ch in 0..Channel::COUNT as u8 {
            assert_eq!(Channel::from_index(ch).map(|c| c.index()), Some(ch as usize));
        }
        assert_eq!(Channel::from_index(6), None);
    }

    #[test]
    fn calibration_scales_codes_to_volts() {
        let cal = Calibration::new(4.0, 0.067);
        let v = cal.apply_code(ADC_CODES_PER_VOLT);
        assert!((v - 4.067).abs() < 1e-5);
    }
}
