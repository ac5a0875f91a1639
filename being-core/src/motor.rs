//! Static motor profile: unit conversion factors, default settings, the
//! set of homing methods a vendor profile accepts.
//!
//! Grounded on `being/motors/definitions.py`'s split from the monolithic
//! legacy `motors.py`: device-specific constants live on the `Motor`
//! profile, behavior lives on `Controller`.

use crate::canopen::ObjectValue;
use std::collections::BTreeMap;

/// Settings merge entry: an `"Object/Subobject"` path to a value, written
/// by SDO when a `Controller` applies settings.
pub type SettingsMap = BTreeMap<String, ObjectValue>;

/// Static per-device constants: SI↔device unit factors and the default
/// settings a vendor profile applies before user overrides.
#[derive(Debug, Clone)]
pub struct Motor {
    pub name: String,
    /// Device position units per SI meter (or radian, for rotary motors).
    pub position_si_to_device: f64,
    /// Device velocity units per SI meter/second.
    pub velocity_si_to_device: f64,
    pub default_settings: SettingsMap,
    pub supported_homing_methods: Vec<i8>,
}

impl Motor {
    pub fn new(
        name: impl Into<String>,
        position_si_to_device: f64,
        velocity_si_to_device: f64,
        supported_homing_methods: Vec<i8>,
    ) -> Self {
        Motor {
            name: name.into(),
            position_si_to_device,
            velocity_si_to_device,
            default_settings: SettingsMap::new(),
            supported_homing_methods,
        }
    }

    pub fn to_device_position(&self, si_position: f64) -> i32 {
        (si_position * self.position_si_to_device).round() as i32
    }

    pub fn to_device_velocity(&self, si_velocity: f64) -> i32 {
        (si_velocity * self.velocity_si_to_device).round() as i32
    }

    pub fn to_si_position(&self, device_position: i32) -> f64 {
        device_position as f64 / self.position_si_to_device
    }

    /// Merge `overrides` over `default_settings`, user wins per key.
    pub fn merged_settings(&self, overrides: &SettingsMap) -> SettingsMap {
        let mut merged = self.default_settings.clone();
        for (key, value) in overrides {
            merged.insert(key.clone(), *value);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_si_position_to_device_units() {
        let motor = Motor::new("test", 1000.0, 1000.0, vec![]);
        assert_eq!(1500, motor.to_device_position(1.5));
    }

    #[test]
    fn roundtrips_position_within_rounding() {
        let motor = Motor::new("test", 1000.0, 1000.0, vec![]);
        let device = motor.to_device_position(0.0123);
        assert!((motor.to_si_position(device) - 0.0123).abs() < 1e-6);
    }

    #[test]
    fn overrides_win_over_defaults_per_key() {
        let mut motor = Motor::new("test", 1000.0, 1000.0, vec![]);
        motor.default_settings.insert("Polarity/0".into(), ObjectValue::U8(0));
        motor
            .default_settings
            .insert("Continuous Current Limit/0".into(), ObjectValue::U32(1500));

        let mut overrides = SettingsMap::new();
        overrides.insert("Polarity/0".into(), ObjectValue::U8(0xC0));

        let merged = motor.merged_settings(&overrides);
        assert_eq!(Some(&ObjectValue::U8(0xC0)), merged.get("Polarity/0"));
        assert_eq!(Some(&ObjectValue::U32(1500)), merged.get("Continuous Current Limit/0"));
    }
}
