//! The heater control loop, independent of the executor.
//!
//! [`ControlLoop::tick`] is called at the oversampling rate. Every tick takes
//! one sample per channel; every `oversampling_rate / sampling_rate` ticks a
//! control step turns the averaged readings into a temperature, trades one
//! telemetry pair for the next setpoint and updates the heater drive.

use crate::drivers::actuator::Actuator;
use crate::drivers::model::{self, TEMPERATURE_SANITY_LIMIT};
use crate::drivers::pid::PiController;
use crate::drivers::sampler::{Readings, Sampler};
use crate::hal::Hal;
use crate::params::Params;
use crate::state::{ErrorCode, Shared};

/// Result of one control step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Heater temperature, K.
    pub temperature: f32,
    /// Bridge resistance, ohms.
    pub resistance: f32,
    pub setpoint: f32,
    /// Requested heater power, W.
    pub power: f32,
    /// Voltage handed to the actuator.
    pub voltage: f32,
}

pub struct ControlLoop<'a, H: Hal> {
    hal: H,
    shared: &'a Shared,
    sampler: Sampler,
    pid: PiController,
    actuator: Actuator,
    ticks: u32,
    steps: u32,
    was_running: bool,
}

impl<'a, H: Hal> ControlLoop<'a, H> {
    pub fn new(hal: H, shared: &'a Shared) -> Self {
        let timings = shared.params.get().timings;
        Self {
            hal,
            shared,
            sampler: Sampler::new(timings.averaging_len as usize),
            pid: PiController::new(),
            actuator: Actuator::new(),
            ticks: 0,
            steps: 0,
            was_running: false,
        }
    }

    /// Bring up the analog front end and park the heater at 0 V. A failure is
    /// latched: the loop keeps sampling but can never be started.
    pub fn init(&mut self) -> bool {
        let ok = self.hal.init();
        if !ok {
            error!("analog front end init failed, heater locked out");
            self.shared.errors.raise(ErrorCode::SoftwareInit);
            self.shared.run.inhibit();
        }
        let dac = self.shared.params.get().dac;
        self.actuator.set(&mut self.hal, 0.0, &dac);
        ok
    }

    /// One oversampling tick. Returns the measurement when a control step
    /// ran while the loop was running.
    pub fn tick(&mut self) -> Option<Measurement> {
        let params = self.shared.params.get();
        let readings = self.sampler.sample(&mut self.hal, &params.adc);

        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % params.timings.oversampling_ratio() != 0 {
            return None;
        }
        self.step(&readings, &params)
    }

    fn step(&mut self, readings: &Readings, params: &Params) -> Option<Measurement> {
        let running = self.shared.run.is_running();
        match (self.was_running, running) {
            (false, true) => self.resume(readings, params),
            (true, false) => self.halt(params),
            _ => {}
        }
        self.was_running = running;
        if !running {
            return None;
        }

        let resistance = model::resistance(readings.v_ref, readings.v_div, params.ref_resistance);
        let temperature = model::temperature(readings.v_heater, readings.i_heater, &params.heater);
        if temperature > TEMPERATURE_SANITY_LIMIT {
            self.shared.errors.raise(ErrorCode::Measure);
        }

        self.shared.telemetry.enqueue(temperature, resistance);
        let setpoint = self.shared.setpoints.next();

        self.pid.set(setpoint, &params.pid);
        let power = self.pid.next(temperature, &params.pid, &self.shared.errors);
        let voltage = match model::drive_voltage(power, self.pid.setpoint(), &params.heater) {
            Ok(v) => v,
            Err(e) => {
                warn!("no drive voltage for {} W: {}", power, e);
                self.shared.errors.raise(ErrorCode::Heater);
                0.0
            }
        };
        self.actuator.set(&mut self.hal, voltage, &params.dac);

        let m = Measurement {
            temperature,
            resistance,
            setpoint: self.pid.setpoint(),
            power,
            voltage,
        };
        self.report(&m, params);
        Some(m)
    }

    fn resume(&mut self, readings: &Readings, params: &Params) {
        let temperature = model::temperature(readings.v_heater, readings.i_heater, &params.heater);
        let r = model::heater_resistance(temperature, &params.heater);
        let power = model::power(self.actuator.get(), r);
        self.pid.seed(power, temperature, &params.pid);
        info!("control loop running, resuming at {} W", power);
    }

    fn halt(&mut self, params: &Params) {
        self.actuator.set(&mut self.hal, 0.0, &params.dac);
        self.pid.reset();
        info!("control loop stopped, heater off");
    }

    fn report(&mut self, m: &Measurement, params: &Params) {
        self.steps = self.steps.wrapping_add(1);
        if self.steps % params.timings.sampling_rate.max(1) != 0 {
            return;
        }
        info!(
            "T = {} K, sp = {} K, R = {} ohm, P = {} W, U = {} V",
            m.temperature,
            m.setpoint,
            m.resistance,
            m.power,
            m.voltage
        );
        if params.pid_debug {
            info!(
                "PI: e = {}, I = {}",
                m.setpoint - m.temperature,
                self.pid.integral_term()
            );
        }
    }

    pub fn actuator_voltage(&self) -> f32 {
        self.actuator.get()
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }
}
