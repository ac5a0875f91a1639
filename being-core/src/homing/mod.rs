//! Homing state machines: the common contract plus the two concrete
//! implementations (standard CiA-402 methods, crude hard-stop).

pub mod crude;
pub mod standard;

use crate::canopen::{CanBackend, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingState {
    Unhomed,
    Ongoing,
    Homed,
    Failed,
}

/// Common contract both homing drivers implement. `update()` is a
/// step-function: it must not suspend, advancing by exactly one tick.
pub trait Homing {
    fn start(&mut self, backend: &mut dyn CanBackend, node: u8) -> Result<(), TransportError>;
    fn update(&mut self, backend: &mut dyn CanBackend, node: u8) -> Result<(), TransportError>;
    fn state(&self) -> HomingState;

    fn homed(&self) -> bool {
        self.state() == HomingState::Homed
    }

    fn ongoing(&self) -> bool {
        self.state() == HomingState::Ongoing
    }
}

/// Resolve the effective homing method/direction per the tie-break rule:
/// an explicit method always wins; otherwise direction sign picks between
/// the supplied hard-stop method pair, subject to what the controller
/// supports.
pub fn default_homing_method(
    homing_method: Option<i8>,
    homing_direction: Option<i8>,
    motor_direction: i8,
    positive_method: i8,
    negative_method: i8,
    supported: &[i8],
) -> Option<i8> {
    if let Some(method) = homing_method {
        return supported.contains(&method).then_some(method);
    }
    let direction = homing_direction.unwrap_or(motor_direction);
    let method = if direction >= 0 { positive_method } else { negative_method };
    supported.contains(&method).then_some(method)
}
