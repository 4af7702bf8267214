//! Battery charge supervision.
//!
//! Charging is switched with hysteresis between `v_high` and `v_low`. The
//! charger's emergency input or an out-of-range pack temperature trips the
//! protection, which is only cleared by unplugging USB.

use crate::hal::{Channel, DigitalInput, DigitalOutput, Hal};
use crate::params::Params;

/// Supervision period, ms.
pub const BATTERY_PERIOD_MS: u64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeState {
    Allowed,
    Inhibited,
    ProtectionTripped,
}

pub struct BatteryMonitor {
    state: ChargeState,
}

impl BatteryMonitor {
    pub const fn new() -> Self {
        Self {
            state: ChargeState::Allowed,
        }
    }

    pub fn state(&self) -> ChargeState {
        self.state
    }

    pub fn step<H: Hal>(&mut self, hal: &mut H, params: &Params) -> ChargeState {
        let volts = read(hal, params, Channel::BatteryVoltage);
        let usb = hal.digital_input(DigitalInput::UsbDetected);
        let limits = &params.battery;

        let next = match self.state {
            ChargeState::Allowed if volts >= limits.v_high => {
                info!("battery full at {} V, charging off", volts);
                ChargeState::Inhibited
            }
            ChargeState::Inhibited if volts <= limits.v_low => {
                info!("battery at {} V, charging on", volts);
                ChargeState::Allowed
            }
            ChargeState::ProtectionTripped if !usb => ChargeState::Allowed,
            s => s,
        };
        self.state = if next == ChargeState::ProtectionTripped {
            next
        } else {
            self.check_protection(hal, params, next)
        };

        self.apply(hal, usb);
        self.state
    }

    fn check_protection<H: Hal>(&self, hal: &mut H, params: &Params, state: ChargeState) -> ChargeState {
        if hal.digital_input(DigitalInput::ChargerEmergency) {
            warn!("charger emergency input active, protection tripped");
            return ChargeState::ProtectionTripped;
        }
        let t = read(hal, params, Channel::BatteryTemp);
        if !params.battery.temperature_ok(t) {
            warn!("battery temperature {} C out of range, protection tripped", t);
            return ChargeState::ProtectionTripped;
        }
        state
    }

    fn apply<H: Hal>(&self, hal: &mut H, usb: bool) {
        let allowed = self.state == ChargeState::Allowed;
        hal.set_digital_output(DigitalOutput::ChargeEnable, allowed);
        // TODO: blink the LED while tripped once the board has a PWM channel on it
        hal.set_digital_output(DigitalOutput::Led, allowed && usb);
    }
}

impl Default for BatteryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn read<H: Hal>(hal: &mut H, params: &Params, channel: Channel) -> f32 {
    let code = hal.read_channel(channel);
    params.adc[channel.index()].apply_code(code as f32)
}
