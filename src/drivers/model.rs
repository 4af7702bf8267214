//! Physical model of the heater and the measurement bridge.
//!
//! Temperatures are in kelvin, the heater is treated as a linear PTC:
//! `R(T) = R_rt * (1 + tempco * (T - T_rt))`.

#[allow(unused_imports)]
use micromath::F32Ext;

/// Temperatures above this are reported as implausible (but still returned).
pub const TEMPERATURE_SANITY_LIMIT: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaterParams {
    /// Temperature coefficient of resistance, 1/K.
    pub tempco: f32,
    /// Heater resistance at `rt_temp`, ohms.
    pub rt_resistance: f32,
    /// Reference temperature, K.
    pub rt_temp: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModelError {
    /// The requested power/setpoint pair has no real drive voltage.
    NegativeRadicand,
    NonFinite,
}

/// Ratiometric bridge: resistance of the unknown leg given the voltage across
/// the reference leg (`v_a`) and across the whole divider (`v_b`).
pub fn resistance(v_a: f32, v_b: f32, r_ref: f32) -> f32 {
    r_ref * (v_b - v_a) / v_a
}

/// Heater temperature from its voltage and current, never below `rt_temp`.
pub fn temperature(voltage: f32, current: f32, heater: &HeaterParams) -> f32 {
    let r = voltage / current;
    let t = heater.rt_temp + (r - heater.rt_resistance) / (heater.tempco * heater.rt_resistance);
    // f32::max ignores a NaN operand, so 0/0 also lands on the floor.
    let t = t.max(heater.rt_temp);
    if t > TEMPERATURE_SANITY_LIMIT {
        warn!("implausible heater temperature {} K (R = {})", t, r);
    }
    t
}

pub fn heater_resistance(temp: f32, heater: &HeaterParams) -> f32 {
    heater.rt_resistance * (1.0 + heater.tempco * (temp - heater.rt_temp))
}

/// Voltage that dissipates `power` in the heater once it sits at `setpoint`.
pub fn drive_voltage(power: f32, setpoint: f32, heater: &HeaterParams) -> Result<f32, ModelError> {
    let radicand = power * heater_resistance(setpoint, heater);
    if !radicand.is_finite() {
        return Err(ModelError::NonFinite);
    }
    if radicand < 0.0 {
        return Err(ModelError::NegativeRadicand);
    }
    Ok(radicand.sqrt())
}

pub fn power(voltage: f32, resistance: f32) -> f32 {
    voltage * voltage / resistance
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEATER: HeaterParams = HeaterParams {
        tempco: 0.0025,
        rt_resistance: 10.0,
        rt_temp: 273.0,
    };

    #[test]
    fn bridge_with_equal_legs() {
        assert_eq!(resistance(1.0, 2.0, 100_000.0), 100_000.0);
    }

    #[test]
    fn bridge_with_zero_reference_voltage_is_infinite() {
        assert!(resistance(0.0, 2.0, 100_000.0).is_infinite());
    }

    #[test]
    fn temperature_is_not_clamped_above_the_sanity_limit() {
        let t = temperature(1.0, 0.01, &HEATER);
        assert!((t - 3873.0).abs() < 0.5, "{t}");
        assert!(t > TEMPERATURE_SANITY_LIMIT);
    }

    #[test]
    fn temperature_floors_at_reference() {
        // 5 ohms is colder than the reference point.
        assert_eq!(temperature(0.05, 0.01, &HEATER), HEATER.rt_temp);
        assert_eq!(temperature(0.0, 0.0, &HEATER), HEATER.rt_temp);
    }

    #[test]
    fn drive_voltage_inverts_joule_heating() {
        let v = drive_voltage(2.5, 673.0, &HEATER).unwrap();
        let r = heater_resistance(673.0, &HEATER);
        assert!((power(v, r) - 2.5).abs() < 0.01);
    }

    #[test]
    fn drive_voltage_rejects_negative_radicand() {
        assert_eq!(
            drive_voltage(-1.0, 673.0, &HEATER),
            Err(ModelError::NegativeRadicand)
        );
        assert_eq!(
            drive_voltage(f32::NAN, 673.0, &HEATER),
            Err(ModelError::NonFinite)
        );
    }
}
