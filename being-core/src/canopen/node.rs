//! CiA-402 drive state machine and `CanNode`.
//!
//! `which_state`/the transition table are grounded on the CiA-402 device
//! profile's statusword bit layout; the node-lifecycle shape (cached
//! status/controlword, per-tick PDO refresh) follows `node_sm.rs`'s
//! typestate, generalized to a runtime enum because the state a `CanNode`
//! is in is only known after reading hardware, not at compile time.

use super::backend::{CanBackend, EmcyRecord, NmtState, TransportError};
use super::object_dictionary::ObjectDictionary;
use enum_display_derive::Display;
use num_enum::TryFromPrimitive;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
}

/// Values match the CiA-402 `Modes of Operation` (0x6060) object
/// encoding, so a `Modes of Operation Display` (0x6061) readback decodes
/// via `TryFromPrimitive` rather than a hand-written match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i8)]
pub enum OperationMode {
    Homing = 6,
    CyclicSynchronousPosition = 8,
    CyclicSynchronousVelocity = 9,
}

impl OperationMode {
    pub fn as_sdo_value(&self) -> i8 {
        *self as i8
    }
}

/// Decode a CiA-402 statusword (object 0x6041) into `DriveState` using the
/// documented bit masks (bits 0,1,2,3,5,6 against the standard mask/match
/// table; bit 4 and others are not part of state decoding).
pub fn which_state(statusword: u16) -> DriveState {
    let masked = statusword & 0b0110_1111;
    match masked {
        0b0000_0000 => DriveState::NotReadyToSwitchOn,
        0b0100_0000 => DriveState::SwitchOnDisabled,
        0b0010_0001 => DriveState::ReadyToSwitchOn,
        0b0010_0011 => DriveState::SwitchedOn,
        0b0010_0111 => DriveState::OperationEnabled,
        0b0000_0111 => DriveState::QuickStopActive,
        0b0000_1111 => DriveState::FaultReactionActive,
        0b0000_1000 => DriveState::Fault,
        _ => DriveState::Fault,
    }
}

/// Controlword bit pattern (object 0x6040) to write for a single-step
/// transition departing from a given state.
fn controlword_for_edge(from: DriveState, to: DriveState) -> Option<u16> {
    use DriveState::*;
    let word = match (from, to) {
        (SwitchOnDisabled, ReadyToSwitchOn) => 0x06,
        (ReadyToSwitchOn, SwitchedOn) => 0x07,
        (SwitchedOn, OperationEnabled) => 0x0F,
        (OperationEnabled, SwitchedOn) => 0x07,
        (SwitchedOn, ReadyToSwitchOn) => 0x06,
        (ReadyToSwitchOn, SwitchOnDisabled) => 0x00,
        (OperationEnabled, QuickStopActive) => 0x02,
        (QuickStopActive, OperationEnabled) => 0x0F,
        (Fault, SwitchOnDisabled) => 0x80,
        (OperationEnabled, ReadyToSwitchOn) => 0x06,
        _ => return None,
    };
    Some(word)
}

/// Static adjacency used by shortest-path composition of multi-step
/// transitions; ordered by decreasing "distance to OperationEnabled" so a
/// breadth-first search terminates quickly for the handful of reachable
/// states.
const TRANSITION_GRAPH: &[(DriveState, DriveState)] = &[
    (DriveState::SwitchOnDisabled, DriveState::ReadyToSwitchOn),
    (DriveState::ReadyToSwitchOn, DriveState::SwitchedOn),
    (DriveState::SwitchedOn, DriveState::OperationEnabled),
    (DriveState::OperationEnabled, DriveState::SwitchedOn),
    (DriveState::SwitchedOn, DriveState::ReadyToSwitchOn),
    (DriveState::ReadyToSwitchOn, DriveState::SwitchOnDisabled),
    (DriveState::OperationEnabled, DriveState::QuickStopActive),
    (DriveState::QuickStopActive, DriveState::OperationEnabled),
    (DriveState::Fault, DriveState::SwitchOnDisabled),
    (DriveState::OperationEnabled, DriveState::ReadyToSwitchOn),
];

/// Breadth-first shortest path over `TRANSITION_GRAPH`, returning the
/// sequence of controlwords to issue one per tick (or synchronously, for
/// `how = 'sdo'`).
fn plan_transition(from: DriveState, to: DriveState) -> Option<Vec<u16>> {
    if from == to {
        return Some(Vec::new());
    }
    use std::collections::{HashMap, VecDeque};
    let mut prev: HashMap<DriveState, DriveState> = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(from);
    let mut visited = std::collections::HashSet::new();
    visited.insert(from);

    while let Some(current) = queue.pop_front() {
        if current == to {
            let mut path = Vec::new();
            let mut node = to;
            while node != from {
                let parent = prev[&node];
                path.push(controlword_for_edge(parent, node)?);
                node = parent;
            }
            path.reverse();
            return Some(path);
        }
        for &(a, b) in TRANSITION_GRAPH {
            if a == current && visited.insert(b) {
                prev.insert(b, a);
                queue.push_back(b);
            }
        }
    }
    None
}

#[derive(Debug, Error, PartialEq)]
pub enum StateSwitchError {
    #[error("no transition plan from {0:?} to {1:?}")]
    NoPlan(DriveState, DriveState),
    #[error("state switch to {0:?} timed out after {1} ticks")]
    Timeout(DriveState, u32),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How a state transition is driven: `Sdo` blocks until the target state
/// is confirmed; `Pdo` issues one controlword per tick and is resumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Sdo,
    Pdo,
}

/// A resumable PDO-driven state switch, advanced once per tick by
/// `Controller::update`.
#[derive(Debug)]
pub struct StateSwitchJob {
    target: DriveState,
    plan: Vec<u16>,
    ticks_without_progress: u32,
    timeout: u32,
}

impl StateSwitchJob {
    fn new(target: DriveState, plan: Vec<u16>, timeout: u32) -> Self {
        StateSwitchJob {
            target,
            plan,
            ticks_without_progress: 0,
            timeout,
        }
    }

    pub fn target(&self) -> DriveState {
        self.target
    }

    /// Advance by one tick: issue the next controlword (if any remain),
    /// observe `observed_state`. Returns `Ok(true)` once `target` is
    /// reached, `Ok(false)` if still in progress, `Err` on timeout.
    pub fn step(
        &mut self,
        backend: &mut dyn CanBackend,
        node: u8,
        observed_state: DriveState,
    ) -> Result<bool, StateSwitchError> {
        if observed_state == self.target {
            return Ok(true);
        }
        self.ticks_without_progress += 1;
        if self.ticks_without_progress > self.timeout {
            return Err(StateSwitchError::Timeout(self.target, self.timeout));
        }
        if let Some(controlword) = self.plan.first().copied() {
            backend.send_pdo(node, 0x6040, &controlword.to_le_bytes())?;
            if self.plan.len() > 1 {
                self.plan.remove(0);
            }
        }
        Ok(false)
    }
}

/// Models a CiA-402 drive: node id, cached status/control words, last
/// known state, operation mode, NMT state, EMCY inbox.
pub struct CanNode {
    node_id: u8,
    object_dictionary: ObjectDictionary,
    statusword: u16,
    controlword: u16,
    state: DriveState,
    operation_mode: OperationMode,
    nmt_state: NmtState,
    emcy_inbox: Vec<EmcyRecord>,
    state_switch_timeout: u32,
}

impl CanNode {
    pub fn new(node_id: u8, object_dictionary: ObjectDictionary, state_switch_timeout: u32) -> Self {
        CanNode {
            node_id,
            object_dictionary,
            statusword: 0,
            controlword: 0,
            state: DriveState::NotReadyToSwitchOn,
            operation_mode: OperationMode::CyclicSynchronousPosition,
            nmt_state: NmtState::PreOperational,
            emcy_inbox: Vec::new(),
            state_switch_timeout,
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn operation_mode(&self) -> OperationMode {
        self.operation_mode
    }

    pub fn object_dictionary(&self) -> &ObjectDictionary {
        &self.object_dictionary
    }

    pub fn object_dictionary_mut(&mut self) -> &mut ObjectDictionary {
        &mut self.object_dictionary
    }

    /// Refresh `statusword`/`state` from the backend's PDO cache. Returns
    /// the previous state so callers can detect a change.
    pub fn refresh_state(&mut self, backend: &mut dyn CanBackend) -> Result<DriveState, TransportError> {
        let bytes = backend.read_pdo(self.node_id, 0x6041)?;
        if let Some(word) = crate::util::u16_from_le_bytes(&bytes) {
            self.statusword = word;
        }
        let previous = self.state;
        self.state = which_state(self.statusword);
        Ok(previous)
    }

    pub fn set_operation_mode(
        &mut self,
        backend: &mut dyn CanBackend,
        mode: OperationMode,
    ) -> Result<(), TransportError> {
        backend.sdo_write(self.node_id, 0x6060, 0x00, &[mode.as_sdo_value() as u8])?;
        self.operation_mode = mode;
        Ok(())
    }

    pub fn drain_emcy(&mut self, backend: &mut dyn CanBackend) -> Vec<EmcyRecord> {
        self.emcy_inbox.extend(backend.emcy_consume(self.node_id));
        std::mem::take(&mut self.emcy_inbox)
    }

    /// Start a state transition, synchronously for `TransitionKind::Sdo`
    /// or as a resumable job for `TransitionKind::Pdo`.
    pub fn change_state(
        &mut self,
        backend: &mut dyn CanBackend,
        target: DriveState,
        how: TransitionKind,
    ) -> Result<Option<StateSwitchJob>, StateSwitchError> {
        let plan = plan_transition(self.state, target).ok_or(StateSwitchError::NoPlan(self.state, target))?;
        match how {
            TransitionKind::Sdo => {
                for controlword in plan {
                    backend.sdo_write(self.node_id, 0x6040, 0x00, &controlword.to_le_bytes())?;
                    self.controlword = controlword;
                }
                self.refresh_state(backend)?;
                Ok(None)
            }
            TransitionKind::Pdo => Ok(Some(StateSwitchJob::new(target, plan, self.state_switch_timeout))),
        }
    }

    pub fn write_target_position(&mut self, backend: &mut dyn CanBackend, device_position: i32) -> Result<(), TransportError> {
        backend.send_pdo(self.node_id, 0x607A, &device_position.to_le_bytes())
    }

    pub fn write_target_velocity(&mut self, backend: &mut dyn CanBackend, device_velocity: i32) -> Result<(), TransportError> {
        backend.send_pdo(self.node_id, 0x60FF, &device_velocity.to_le_bytes())
    }

    pub fn read_actual_position(&mut self, backend: &mut dyn CanBackend) -> Result<i32, TransportError> {
        let bytes = backend.read_pdo(self.node_id, 0x6064)?;
        Ok(crate::util::i32_from_le_bytes(&bytes).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canopen::backend::FakeBackend;

    #[test]
    fn decodes_operation_enabled() {
        assert_eq!(DriveState::OperationEnabled, which_state(0b0010_0111));
    }

    #[test]
    fn decodes_switch_on_disabled() {
        assert_eq!(DriveState::SwitchOnDisabled, which_state(0b0100_0000));
    }

    #[test]
    fn plans_multi_step_transition_from_disabled_to_operation_enabled() {
        let plan = plan_transition(DriveState::SwitchOnDisabled, DriveState::OperationEnabled).unwrap();
        assert_eq!(vec![0x06, 0x07, 0x0F], plan);
    }

    #[test]
    fn sdo_transition_writes_every_step_synchronously() {
        let mut backend = FakeBackend::new();
        let mut node = CanNode::new(5, ObjectDictionary::new(), 50);
        node.state = DriveState::SwitchOnDisabled;
        backend.set_pdo(5, 0x6041, 0u16.to_le_bytes().to_vec());
        node.change_state(&mut backend, DriveState::SwitchedOn, TransitionKind::Sdo).unwrap();
        assert_eq!(2, backend.sdo_writes.len());
    }

    #[test]
    fn pdo_job_issues_one_controlword_per_step_until_state_observed() {
        let mut backend = FakeBackend::new();
        let mut node = CanNode::new(5, ObjectDictionary::new(), 3);
        node.state = DriveState::SwitchOnDisabled;
        let mut job = node
            .change_state(&mut backend, DriveState::ReadyToSwitchOn, TransitionKind::Pdo)
            .unwrap()
            .unwrap();

        let done = job.step(&mut backend, 5, DriveState::SwitchOnDisabled).unwrap();
        assert!(!done);
        assert_eq!(1, backend.pdo_writes.len());

        let done = job.step(&mut backend, 5, DriveState::ReadyToSwitchOn).unwrap();
        assert!(done);
    }

    #[test]
    fn pdo_job_times_out_without_progress() {
        let mut backend = FakeBackend::new();
        let mut node = CanNode::new(5, ObjectDictionary::new(), 2);
        node.state = DriveState::SwitchOnDisabled;
        let mut job = node
            .change_state(&mut backend, DriveState::ReadyToSwitchOn, TransitionKind::Pdo)
            .unwrap()
            .unwrap();

        job.step(&mut backend, 5, DriveState::SwitchOnDisabled).unwrap();
        job.step(&mut backend, 5, DriveState::SwitchOnDisabled).unwrap();
        let err = job.step(&mut backend, 5, DriveState::SwitchOnDisabled).unwrap_err();
        assert_eq!(StateSwitchError::Timeout(DriveState::ReadyToSwitchOn, 2), err);
    }
}
