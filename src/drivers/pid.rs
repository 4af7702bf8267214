#[allow(unused_imports)]
use micromath::F32Ext;

use crate::state::{ErrorCode, ErrorFlags};

/// Coefficients of the heater PI law. Field order is the wire order of
/// `SET_PID_PARAMS`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidParams {
    /// Integral gain.
    pub k_i: f32,
    /// Upper bound of the integral term.
    pub lim_i: f32,
    /// Proportional gain on the error.
    pub k_pe: f32,
    /// Proportional gain on the temperature above ambient (dissipation feed-forward).
    pub k_pd: f32,
    /// Setpoint changes smaller than this are ignored.
    pub setpoint_tolerance: f32,
    /// Scales the integral step to the control period.
    pub timing_factor: f32,
    pub ambient_temp: f32,
}

/// PI controller with an upper-only clamp on the integral term and an integral
/// reset when the setpoint steps down.
pub struct PiController {
    last_setpoint: f32,
    integral_term: f32,
}

impl PiController {
    pub const fn new() -> Self {
        Self {
            last_setpoint: 0.0,
            integral_term: 0.0,
        }
    }

    pub fn setpoint(&self) -> f32 {
        self.last_setpoint
    }

    pub fn integral_term(&self) -> f32 {
        self.integral_term
    }

    pub fn set(&mut self, setpoint: f32, params: &PidParams) {
        if (setpoint - self.last_setpoint).abs() < params.setpoint_tolerance {
            return;
        }
        if setpoint < self.last_setpoint {
            self.integral_term = 0.0;
        }
        self.last_setpoint = setpoint;
    }

    /// Next heater power for the measured temperature. Never negative; a
    /// non-finite result raises [`ErrorCode::Heater`] and yields 0. A
    /// non-finite error is skipped without touching the integral.
    pub fn next(&mut self, measurement: f32, params: &PidParams, errors: &ErrorFlags) -> f32 {
        let e = self.last_setpoint - measurement;
        let step = e * params.timing_factor;
        if !step.is_finite() {
            warn!("non-finite PI error {} at {} K", e, measurement);
            errors.raise(ErrorCode::Heater);
            return 0.0;
        }
        self.integral_term += step;
        if self.integral_term > params.lim_i {
            self.integral_term = params.lim_i;
        }

        let power = params.k_pe * e
            + params.k_pd * (measurement - params.ambient_temp)
            + params.k_i * self.integral_term;

        if !power.is_finite() {
            warn!("non-finite PI output (e = {}, I = {})", e, self.integral_term);
            errors.raise(ErrorCode::Heater);
            return 0.0;
        }
        power.max(0.0)
    }

    /// Pick the integral term so the next output (at zero error) equals
    /// `power`. Used to pick up where the actuator was left on resume.
    pub fn seed(&mut self, power: f32, measurement: f32, params: &PidParams) {
        if params.k_i == 0.0 || !power.is_finite() {
            return;
        }
        let integral = (power - params.k_pd * (measurement - params.ambient_temp)) / params.k_i;
        if integral.is_finite() {
            self.integral_term = integral.min(params.lim_i);
        }
    }

    pub fn reset(&mut self) {
        self.last_setpoint = 0.0;
        self.integral_term = 0.0;
    }
}

impl Default for PiController {
    fn default() -> Self {
        Self::new()
    }
}
