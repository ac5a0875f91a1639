//! Standard CiA-402 homing (object 0x6098, statusword bits 10/13).

use super::{Homing, HomingState};
use crate::canopen::{CanBackend, OperationMode, TransportError};

const STATUSWORD_HOMING_ATTAINED: u16 = 1 << 12;
const STATUSWORD_HOMING_ERROR: u16 = 1 << 13;
const CONTROLWORD_START_HOMING: u16 = 0x1F;

pub struct CiA402Homing {
    method: i8,
    state: HomingState,
    ticks: u32,
    timeout: u32,
}

impl CiA402Homing {
    pub fn new(method: i8, timeout: u32) -> Self {
        CiA402Homing {
            method,
            state: HomingState::Unhomed,
            ticks: 0,
            timeout,
        }
    }

    pub fn method(&self) -> i8 {
        self.method
    }
}

impl Homing for CiA402Homing {
    fn start(&mut self, backend: &mut dyn CanBackend, node: u8) -> Result<(), TransportError> {
        backend.sdo_write(node, 0x6098, 0x00, &self.method.to_le_bytes())?;
        backend.sdo_write(node, 0x6060, 0x00, &[OperationMode::Homing.as_sdo_value() as u8])?;
        backend.send_pdo(node, 0x6040, &CONTROLWORD_START_HOMING.to_le_bytes())?;
        self.state = HomingState::Ongoing;
        self.ticks = 0;
        Ok(())
    }

    fn update(&mut self, backend: &mut dyn CanBackend, node: u8) -> Result<(), TransportError> {
        if self.state != HomingState::Ongoing {
            return Ok(());
        }
        self.ticks += 1;
        let bytes = backend.read_pdo(node, 0x6041)?;
        let statusword = crate::util::u16_from_le_bytes(&bytes).unwrap_or(0);

        if statusword & STATUSWORD_HOMING_ERROR != 0 {
            self.state = HomingState::Failed;
        } else if statusword & STATUSWORD_HOMING_ATTAINED != 0 {
            self.state = HomingState::Homed;
        } else if self.ticks > self.timeout {
            self.state = HomingState::Failed;
        }
        Ok(())
    }

    fn state(&self) -> HomingState {
        self.state
    }
}
