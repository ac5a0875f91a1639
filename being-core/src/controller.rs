//! Vendor-aware wrapper around a `CanNode` and `Motor` profile; drives the
//! per-tick CiA-402 sequence and exposes the SI-unit commanding API.
//!
//! Update ordering is grounded on `original_source/being/motors/
//! controllers.py`'s `Controller.update()`: statusword refresh and
//! `STATE_CHANGED`, then fault draining, then homing advance, then
//! state-switch advance -- in that fixed order, once per tick.

use crate::canopen::{CanBackend, CanNode, DriveState, OperationMode, ObjectValue, StateSwitchError, StateSwitchJob, TransitionKind, TransportError};
use crate::homing::{default_homing_method, Homing, HomingState};
use crate::motor::{Motor, SettingsMap};
use crate::pubsub::{MotorEvent, MotorEventBus, MotorId};
use crate::vendor::{VendorAction, VendorProfile};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
    #[error("no supported homing method for direction/override given")]
    UnsupportedHomingMethod,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    StateSwitch(#[from] StateSwitchError),
}

pub struct Controller {
    id: MotorId,
    node: CanNode,
    motor: Motor,
    direction: i8,
    lower: i32,
    upper: i32,
    vendor: Box<dyn VendorProfile>,
    homing: Option<Box<dyn Homing>>,
    switch_job: Option<StateSwitchJob>,
    bus: MotorEventBus,
    last_state: Option<DriveState>,
    state_switch_timeout: u32,
}

impl Controller {
    /// Builds the controller, then once-off drains and logs the node's
    /// error-history register (object 0x1003) the way `Controller.__init__`
    /// does before leaving the drive disabled.
    pub fn new(
        id: MotorId,
        node: CanNode,
        motor: Motor,
        direction: i8,
        lower: i32,
        upper: i32,
        vendor: Box<dyn VendorProfile>,
        state_switch_timeout: u32,
        backend: &mut dyn CanBackend,
    ) -> Result<Self, ControllerError> {
        let mut controller = Controller {
            id,
            node,
            motor,
            direction,
            lower,
            upper,
            vendor,
            homing: None,
            switch_job: None,
            bus: MotorEventBus::new(),
            last_state: None,
            state_switch_timeout,
        };
        controller.drain_error_history(backend)?;
        Ok(controller)
    }

    /// Reads the number of recorded errors from `0x1003:0x00`, then each
    /// entry `0x1003:0x01..=N`, logging the error code found in each.
    pub fn drain_error_history(&mut self, backend: &mut dyn CanBackend) -> Result<Vec<u16>, ControllerError> {
        let node_id = self.node.node_id();
        let count_bytes = backend.sdo_read(node_id, 0x1003, 0x00)?;
        let count = count_bytes.first().copied().unwrap_or(0);
        let mut codes = Vec::new();
        for entry in 1..=count {
            let bytes = backend.sdo_read(node_id, 0x1003, entry)?;
            if let Some(code) = crate::util::u16_from_le_bytes(&bytes) {
                log::error!("error history entry {entry} for motor {:?}: code {code:#06x}", self.id);
                codes.push(code);
            }
        }
        Ok(codes)
    }

    pub fn id(&self) -> MotorId {
        self.id
    }

    pub fn events(&mut self) -> &mut MotorEventBus {
        &mut self.bus
    }

    pub fn homed(&self) -> bool {
        self.homing.as_ref().map(|h| h.homed()).unwrap_or(false)
    }

    pub fn state(&self) -> DriveState {
        self.node.state()
    }

    /// Merge `motor.default_settings` with `overrides` (user wins) and
    /// apply the vendor's pre-settings reset, then write every entry by
    /// SDO. Fails with `UnknownSetting` if a key is absent from the
    /// object dictionary.
    pub fn apply_settings(&mut self, backend: &mut dyn CanBackend, overrides: &SettingsMap) -> Result<(), ControllerError> {
        for (name, value) in self.vendor.pre_settings_reset() {
            self.write_setting(backend, &name, value)?;
        }
        let merged = self.motor.merged_settings(overrides);
        for (name, value) in &merged {
            self.write_setting(backend, name, *value)?;
        }
        Ok(())
    }

    fn write_setting(&mut self, backend: &mut dyn CanBackend, name: &str, value: ObjectValue) -> Result<(), ControllerError> {
        let (index, subindex) = self
            .node
            .object_dictionary()
            .resolve(name)
            .map_err(|_| ControllerError::UnknownSetting(name.to_string()))?;
        self.node
            .object_dictionary_mut()
            .set(index, subindex, value)
            .map_err(|_| ControllerError::UnknownSetting(name.to_string()))?;
        let bytes = match value {
            ObjectValue::I32(v) => v.to_le_bytes().to_vec(),
            ObjectValue::U32(v) => v.to_le_bytes().to_vec(),
            ObjectValue::I16(v) => v.to_le_bytes().to_vec(),
            ObjectValue::U16(v) => v.to_le_bytes().to_vec(),
            ObjectValue::U8(v) => vec![v],
        };
        let node_id = self.node.node_id();
        backend.sdo_write(node_id, index, subindex, &bytes)?;
        Ok(())
    }

    /// Resolve and start a homing job per the tie-break rule, applying the
    /// vendor's firmware-quirk substitution and hard-stop override.
    pub fn home(
        &mut self,
        backend: &mut dyn CanBackend,
        homing_method: Option<i8>,
        homing_direction: Option<i8>,
    ) -> Result<(), ControllerError> {
        let method = default_homing_method(
            homing_method,
            homing_direction,
            self.direction,
            17,
            18,
            &self.motor.supported_homing_methods,
        )
        .ok_or(ControllerError::UnsupportedHomingMethod)?;
        let method = self.vendor.adjust_homing_method(method);
        let direction = homing_direction.unwrap_or(self.direction);

        let mut homing = self.vendor.build_homing(method, direction, self.state_switch_timeout);
        homing.start(backend, self.node.node_id())?;
        self.homing = Some(homing);
        Ok(())
    }

    pub fn enable(&mut self, backend: &mut dyn CanBackend) -> Result<(), ControllerError> {
        self.vendor.apply_motor_direction(backend, self.node.node_id(), self.direction)?;
        match self.node.change_state(backend, DriveState::OperationEnabled, TransitionKind::Pdo)? {
            Some(job) => self.switch_job = Some(job),
            None => {}
        }
        Ok(())
    }

    pub fn disable(&mut self, backend: &mut dyn CanBackend) -> Result<(), ControllerError> {
        match self.node.change_state(backend, DriveState::SwitchedOn, TransitionKind::Pdo)? {
            Some(job) => self.switch_job = Some(job),
            None => {}
        }
        Ok(())
    }

    /// Clip to `[lower, upper]`, apply direction, write to PDO target
    /// position. Ignored while unhomed.
    pub fn set_target_position(&mut self, backend: &mut dyn CanBackend, si_position: f64) -> Result<(), ControllerError> {
        if !self.homed() {
            return Ok(());
        }
        let device = self.motor.to_device_position(si_position).clamp(self.lower, self.upper);
        let commanded = if self.direction >= 0 {
            device
        } else {
            (self.upper - self.lower) - (device - self.lower) + self.lower
        };
        self.node.write_target_position(backend, commanded)?;
        Ok(())
    }

    pub fn play_velocity_profile(&mut self, backend: &mut dyn CanBackend, si_velocity: f64) -> Result<(), ControllerError> {
        let device = self.motor.to_device_velocity(si_velocity) * self.direction as i32;
        self.node.write_target_velocity(backend, device)?;
        Ok(())
    }

    /// The fixed per-tick sequence: refresh state, drain faults, advance
    /// homing, advance state-switch, then the vendor's post-update hook.
    pub fn update(&mut self, backend: &mut dyn CanBackend) -> Result<(), ControllerError> {
        self.node.refresh_state(backend)?;
        let state = self.node.state();
        if self.last_state != Some(state) {
            self.last_state = Some(state);
            self.bus.publish(MotorEvent::StateChanged {
                motor: self.id,
                state: state.to_string(),
            });
        }

        let mut emcy_snapshot = Vec::new();
        if state == DriveState::Fault {
            let records = self.node.drain_emcy(backend);
            for record in &records {
                self.bus.publish(MotorEvent::Error {
                    motor: self.id,
                    message: format!("EMCY code {:#06x} register {:#04x}", record.code, record.register),
                });
            }
            emcy_snapshot = records;
        }

        if let Some(homing) = self.homing.as_mut() {
            if homing.ongoing() {
                let before = homing.state();
                homing.update(backend, self.node.node_id())?;
                if homing.state() != before {
                    self.bus.publish(MotorEvent::HomingChanged {
                        motor: self.id,
                        state: format!("{:?}", homing.state()),
                    });
                }
            }
        } else if let Some(job) = self.switch_job.as_mut() {
            let target = job.target();
            match job.step(backend, self.node.node_id(), state) {
                Ok(true) => self.switch_job = None,
                Ok(false) => {}
                Err(_) => {
                    log::warn!("state switch to {target:?} timed out for motor {:?}", self.id);
                    self.switch_job = None;
                }
            }
        }

        let action = self.vendor.post_update(backend, self.node.node_id(), state, &emcy_snapshot)?;
        if action == VendorAction::ReenableDrive {
            if let Some(job) = self.node.change_state(backend, DriveState::OperationEnabled, TransitionKind::Pdo)? {
                self.switch_job = Some(job);
            }
        }

        Ok(())
    }

    pub fn operation_mode(&self) -> OperationMode {
        self.node.operation_mode()
    }

    /// Whether a PDO-driven state switch is still in flight. Cleared on
    /// reaching the target state or on timing out.
    pub fn has_pending_switch_job(&self) -> bool {
        self.switch_job.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockIdAllocator;
    use crate::canopen::backend::FakeBackend;
    use crate::canopen::ObjectDictionary;
    use crate::vendor::Mclm3002;

    fn make_controller(id: MotorId, backend: &mut FakeBackend) -> Controller {
        let node = CanNode::new(5, ObjectDictionary::new(), 50);
        let motor = Motor::new("test", 1000.0, 1000.0, vec![-1, -2, -3, -4, 17, 18]);
        let vendor = Box::new(Mclm3002 {
            homing_velocity: 1000,
            safe_current_limit: 200,
            min_width: 100,
        });
        Controller::new(id, node, motor, 1, -1000, 1000, vendor, 50, backend).unwrap()
    }

    #[test]
    fn unhomed_controller_ignores_set_target_position() {
        let mut alloc = BlockIdAllocator::new();
        let mut backend = FakeBackend::new();
        let mut controller = make_controller(alloc.alloc(), &mut backend);
        controller.set_target_position(&mut backend, 0.5).unwrap();
        assert!(backend.pdo_writes.is_empty());
    }

    #[test]
    fn state_changed_published_once_per_transition() {
        let mut alloc = BlockIdAllocator::new();
        let mut backend = FakeBackend::new();
        let mut controller = make_controller(alloc.alloc(), &mut backend);
        backend.set_pdo(5, 0x6041, 0b0010_0111u16.to_le_bytes().to_vec());

        let events = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let events_handle = std::rc::Rc::clone(&events);
        controller.events().subscribe(move |e| events_handle.borrow_mut().push(e.clone()));

        controller.update(&mut backend).unwrap();
        controller.update(&mut backend).unwrap();

        assert_eq!(1, events.borrow().len());
    }

    #[test]
    fn reverse_direction_mirrors_commanded_position() {
        let mut alloc = BlockIdAllocator::new();
        let mut backend = FakeBackend::new();
        let mut controller = make_controller(alloc.alloc(), &mut backend);
        controller.direction = -1;
        controller.homing = Some(Box::new(crate::homing::standard::CiA402Homing::new(17, 10)));
        controller.homing.as_mut().unwrap().start(&mut backend, 5).unwrap();
        // force homed for the purpose of this unit test
        let homed_bytes = (1u16 << 12).to_le_bytes().to_vec();
        backend.set_pdo(5, 0x6041, homed_bytes);
        controller.homing.as_mut().unwrap().update(&mut backend, 5).unwrap();
        assert!(controller.homed());

        controller.set_target_position(&mut backend, 0.0).unwrap();
        let (_, _, commanded_bytes) = backend.pdo_writes.last().unwrap();
        let commanded = crate::util::i32_from_le_bytes(commanded_bytes).unwrap();
        assert_eq!(2000, commanded); // upper(1000) - lower(-1000) - (0 - lower(-1000)) + lower(-1000)
    }

    #[test]
    fn apply_settings_writes_to_the_resolved_object_address() {
        let mut alloc = BlockIdAllocator::new();
        let mut backend = FakeBackend::new();
        let mut controller = make_controller(alloc.alloc(), &mut backend);
        controller
            .node
            .object_dictionary_mut()
            .register("Polarity/0", 0x607E, 0x00, ObjectValue::U8(0));

        let mut overrides = SettingsMap::new();
        overrides.insert("Polarity/0".into(), ObjectValue::U8(0xC0));
        controller.apply_settings(&mut backend, &overrides).unwrap();

        assert!(backend
            .sdo_writes
            .iter()
            .any(|(_, index, subindex, bytes)| *index == 0x607E && *subindex == 0x00 && bytes == &vec![0xC0]));
    }

    #[test]
    fn apply_settings_rejects_unknown_setting_name() {
        let mut alloc = BlockIdAllocator::new();
        let mut backend = FakeBackend::new();
        let mut controller = make_controller(alloc.alloc(), &mut backend);
        let mut overrides = SettingsMap::new();
        overrides.insert("Nonexistent/0".into(), ObjectValue::U8(1));
        assert!(controller.apply_settings(&mut backend, &overrides).is_err());
    }

    #[test]
    fn drain_error_history_is_a_no_op_with_an_empty_register() {
        let mut alloc = BlockIdAllocator::new();
        let mut backend = FakeBackend::new();
        let mut controller = make_controller(alloc.alloc(), &mut backend);
        let codes = controller.drain_error_history(&mut backend).unwrap();
        assert!(codes.is_empty());
    }
}
