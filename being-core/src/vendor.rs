//! Vendor-specific controller specializations.
//!
//! Grounded on `original_source/being/motors/controllers.py`'s `Mclm3002`
//! and `Epos4` subclasses of `Controller`. Rust has no subclassing, so
//! each vendor is a `Box<dyn VendorProfile>` strategy the `Controller`
//! consults at the points the original overrides: homing-method gating,
//! polarity, and an Epos4-only per-tick hook.

use crate::canopen::{CanBackend, DriveState, EmcyRecord, ObjectValue, OperationMode, TransportError};
use crate::homing::crude::CrudeHoming;
use crate::homing::standard::CiA402Homing;
use crate::homing::Homing;

/// EMCY code Epos4 emits on an RPDO communication timeout.
pub const EPOS4_RPDO_TIMEOUT_CODE: u16 = 0x8250;

/// Manufacturer-specific "Axis configuration miscellaneous" register;
/// bit 0 is the motor direction polarity bit.
const EPOS4_AXIS_CONFIGURATION_MISC: (u16, u8) = (0x3000, 0x02);

/// Per-tick outcome a vendor profile's post-update hook can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorAction {
    None,
    ReenableDrive,
}

/// Vendor-specific behavior a `Controller` delegates to. Default method
/// bodies match the common case (no hard-stop homing, no special
/// recovery); `Mclm3002`/`Epos4` override only what they specialize.
pub trait VendorProfile {
    fn homing_method_is_hard_stop(&self, _method: i8) -> bool {
        false
    }

    fn build_homing(&self, method: i8, direction: i8, timeout: u32) -> Box<dyn Homing> {
        Box::new(CiA402Homing::new(method, timeout))
    }

    /// Adjust `method` for firmware quirks (Epos4's 35→37 substitution).
    fn adjust_homing_method(&self, method: i8) -> i8 {
        method
    }

    /// Apply direction-dependent SDO settings (Mclm3002's `Polarity`).
    fn apply_motor_direction(&self, _backend: &mut dyn CanBackend, _node: u8, _direction: i8) -> Result<(), TransportError> {
        Ok(())
    }

    /// Settings to reset before applying user/default overrides
    /// (Epos4 zeroes all digital inputs to avoid double-bind conflicts).
    fn pre_settings_reset(&self) -> Vec<(String, ObjectValue)> {
        Vec::new()
    }

    /// Per-tick hook run after the common `Controller::update` sequence.
    /// Epos4 uses this for the custom velocity-mode position controller
    /// and RPDO-timeout recovery.
    fn post_update(
        &mut self,
        _backend: &mut dyn CanBackend,
        _node: u8,
        _state: DriveState,
        _emcy: &[EmcyRecord],
    ) -> Result<VendorAction, TransportError> {
        Ok(VendorAction::None)
    }
}

/// Faulhaber MCLM3002: forces crude hard-stop homing for methods in
/// {-1,-2,-3,-4}; polarity set via SDO `Polarity` (0x607E).
pub struct Mclm3002 {
    pub homing_velocity: i32,
    pub safe_current_limit: u32,
    pub min_width: i32,
}

impl Mclm3002 {
    pub const SUPPORTED_HOMING_METHODS: &'static [i8] = &[-4, -3, -2, -1, 17, 18];
}

impl VendorProfile for Mclm3002 {
    fn homing_method_is_hard_stop(&self, method: i8) -> bool {
        matches!(method, -1 | -2 | -3 | -4)
    }

    fn build_homing(&self, method: i8, direction: i8, timeout: u32) -> Box<dyn Homing> {
        if self.homing_method_is_hard_stop(method) {
            Box::new(CrudeHoming::new(
                method,
                direction,
                self.homing_velocity,
                self.safe_current_limit,
                self.min_width,
            ))
        } else {
            Box::new(CiA402Homing::new(method, timeout))
        }
    }

    fn apply_motor_direction(&self, backend: &mut dyn CanBackend, node: u8, direction: i8) -> Result<(), TransportError> {
        let polarity: u8 = if direction >= 0 { 0x00 } else { 0b1100_0000 };
        backend.sdo_write(node, 0x607E, 0x00, &[polarity])
    }
}

/// Maxon Epos4: method 35 is firmware-restricted and substituted with 37;
/// digital inputs are reset before settings apply; an optional custom
/// velocity-mode position controller and RPDO-timeout auto-recovery.
pub struct Epos4 {
    pub use_position_controller: bool,
    pub recover_rpdo_timeout_error: bool,
    pub position_gain: f64,
    /// Set once an EMCY 0x8250 has been observed while in `FAULT`;
    /// cleared when the controller re-enables the drive.
    rpdo_timeout_pending: bool,
}

impl Epos4 {
    pub fn new(use_position_controller: bool, recover_rpdo_timeout_error: bool, position_gain: f64) -> Self {
        Epos4 {
            use_position_controller,
            recover_rpdo_timeout_error,
            position_gain,
            rpdo_timeout_pending: false,
        }
    }
}

impl VendorProfile for Epos4 {
    fn adjust_homing_method(&self, method: i8) -> i8 {
        if method == 35 {
            37
        } else {
            method
        }
    }

    /// Read-modify-write bit 0 of "Axis configuration miscellaneous":
    /// clear for forward, set for reverse.
    fn apply_motor_direction(&self, backend: &mut dyn CanBackend, node: u8, direction: i8) -> Result<(), TransportError> {
        let (index, subindex) = EPOS4_AXIS_CONFIGURATION_MISC;
        let bytes = backend.sdo_read(node, index, subindex)?;
        let misc = crate::util::u16_from_le_bytes(&bytes).unwrap_or(0);
        let new_misc = if direction >= 0 { misc & !0x0001 } else { misc | 0x0001 };
        backend.sdo_write(node, index, subindex, &new_misc.to_le_bytes())
    }

    fn pre_settings_reset(&self) -> Vec<(String, ObjectValue)> {
        (0..8)
            .map(|i| (format!("Digital Input Configuration/{i}"), ObjectValue::U8(0)))
            .collect()
    }

    fn post_update(
        &mut self,
        backend: &mut dyn CanBackend,
        node: u8,
        state: DriveState,
        emcy: &[EmcyRecord],
    ) -> Result<VendorAction, TransportError> {
        if self.recover_rpdo_timeout_error {
            if state == DriveState::Fault && emcy.iter().any(|r| r.code == EPOS4_RPDO_TIMEOUT_CODE) {
                self.rpdo_timeout_pending = true;
            }
            if self.rpdo_timeout_pending && state == DriveState::Fault {
                backend.send_pdo(node, 0x6040, &0x80u16.to_le_bytes())?;
                self.rpdo_timeout_pending = false;
                return Ok(VendorAction::ReenableDrive);
            }
        }
        if !self.use_position_controller && state == DriveState::OperationEnabled {
            backend.sdo_write(node, 0x6060, 0x00, &[OperationMode::CyclicSynchronousVelocity.as_sdo_value() as u8])?;
        }
        Ok(VendorAction::None)
    }
}

impl Epos4 {
    /// `v = gain * (p_ref - p_actual)`, the per-tick proportional
    /// controller substituting for the firmware's position mode when
    /// `use_position_controller = false`.
    pub fn velocity_command(&self, reference_position: i32, actual_position: i32) -> i32 {
        (self.position_gain * (reference_position - actual_position) as f64).round() as i32
    }
}
