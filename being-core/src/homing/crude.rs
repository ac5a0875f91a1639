//! Hard-stop homing for drives without native current-limited homing
//! (methods -1..-4). Runs the axis into its mechanical stop(s) at reduced
//! current, detects "no progress while torque-saturated" as contact, and
//! offsets the encoder so the stop maps to position 0 (or `length`).

use super::{Homing, HomingState};
use crate::canopen::{CanBackend, OperationMode, TransportError};

/// Consecutive no-progress ticks (while torque-saturated) required to
/// call a mechanical stop reached.
const STALL_TICKS: u32 = 5;
/// Minimum encoder delta between ticks to count as "progress".
const PROGRESS_EPSILON: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    LoweringCurrentLimit,
    SeekingFirstStop,
    SeekingSecondStop,
    Finishing,
}

/// Homing methods that calibrate both ends and derive `length`.
fn calibrates_both_ends(method: i8) -> bool {
    matches!(method, -3 | -4)
}

pub struct CrudeHoming {
    method: i8,
    direction: i8,
    homing_velocity: i32,
    safe_current_limit: u32,
    original_current_limit: Option<u32>,
    min_width: i32,
    state: HomingState,
    phase: Phase,
    last_position: i32,
    stall_ticks: u32,
    first_stop: Option<i32>,
    second_stop: Option<i32>,
}

impl CrudeHoming {
    pub fn new(method: i8, direction: i8, homing_velocity: i32, safe_current_limit: u32, min_width: i32) -> Self {
        CrudeHoming {
            method,
            direction,
            homing_velocity,
            safe_current_limit,
            original_current_limit: None,
            min_width,
            state: HomingState::Unhomed,
            phase: Phase::LoweringCurrentLimit,
            last_position: 0,
            stall_ticks: 0,
            first_stop: None,
            second_stop: None,
        }
    }

    fn signed_velocity(&self, outward: bool) -> i32 {
        let sign = if outward { self.direction } else { -self.direction };
        self.homing_velocity * sign as i32
    }

    /// Torque saturation is approximated by reading back `Continuous
    /// Current Limit` (0x6075) and comparing against the lowered safe
    /// value: a real controller would additionally read actual current,
    /// but the `CanBackend` seam exposes no such PDO, so stall is driven
    /// purely from encoder progress here.
    fn detect_stop(&mut self, position: i32) -> bool {
        if (position - self.last_position).abs() < PROGRESS_EPSILON {
            self.stall_ticks += 1;
        } else {
            self.stall_ticks = 0;
        }
        self.last_position = position;
        self.stall_ticks >= STALL_TICKS
    }
}

impl Homing for CrudeHoming {
    fn start(&mut self, backend: &mut dyn CanBackend, node: u8) -> Result<(), TransportError> {
        let limit_bytes = backend.sdo_read(node, 0x6075, 0x00)?;
        self.original_current_limit = crate::util::i32_from_le_bytes(&limit_bytes).map(|v| v as u32);
        backend.sdo_write(node, 0x6073, 0x00, &self.safe_current_limit.to_le_bytes())?;
        backend.sdo_write(node, 0x6060, 0x00, &[OperationMode::CyclicSynchronousVelocity.as_sdo_value() as u8])?;
        backend.send_pdo(node, 0x60FF, &self.signed_velocity(true).to_le_bytes())?;
        self.state = HomingState::Ongoing;
        self.phase = Phase::SeekingFirstStop;
        self.stall_ticks = 0;
        Ok(())
    }

    fn update(&mut self, backend: &mut dyn CanBackend, node: u8) -> Result<(), TransportError> {
        if self.state != HomingState::Ongoing {
            return Ok(());
        }
        let bytes = backend.read_pdo(node, 0x6064)?;
        let position = crate::util::i32_from_le_bytes(&bytes).unwrap_or(self.last_position);

        match self.phase {
            Phase::SeekingFirstStop => {
                if self.detect_stop(position) {
                    self.first_stop = Some(position);
                    if calibrates_both_ends(self.method) {
                        backend.send_pdo(node, 0x60FF, &self.signed_velocity(false).to_le_bytes())?;
                        self.stall_ticks = 0;
                        self.phase = Phase::SeekingSecondStop;
                    } else {
                        self.phase = Phase::Finishing;
                    }
                }
            }
            Phase::SeekingSecondStop => {
                if self.detect_stop(position) {
                    self.second_stop = Some(position);
                    self.phase = Phase::Finishing;
                }
            }
            Phase::Finishing | Phase::LoweringCurrentLimit => {}
        }

        if self.phase == Phase::Finishing {
            self.finish(backend, node)?;
        }
        Ok(())
    }

    fn state(&self) -> HomingState {
        self.state
    }
}

impl CrudeHoming {
    /// The raw position of the hard stop taken as the negative reference:
    /// for single-stop methods, the one stop found; for two-stop methods,
    /// the stop reached while travelling opposite to `direction`.
    fn negative_hard_stop(&self) -> Option<i32> {
        if calibrates_both_ends(self.method) {
            if self.direction >= 0 {
                self.second_stop
            } else {
                self.first_stop
            }
        } else {
            self.first_stop
        }
    }

    fn finish(&mut self, backend: &mut dyn CanBackend, node: u8) -> Result<(), TransportError> {
        let length = match (self.first_stop, self.second_stop) {
            (Some(a), Some(b)) => (b - a).abs(),
            (Some(_), None) => 0,
            _ => 0,
        };

        if calibrates_both_ends(self.method) && length < self.min_width {
            self.state = HomingState::Failed;
            return Ok(());
        }

        // Home offset so the negative hard stop maps to 0 (or min_width,
        // the known/derived travel length, for direction < 0): actual
        // position = raw position - home offset.
        if let Some(raw) = self.negative_hard_stop() {
            let mapped = if self.direction >= 0 { 0 } else { self.min_width };
            backend.sdo_write(node, 0x607C, 0x00, &(raw - mapped).to_le_bytes())?;
        }

        backend.send_pdo(node, 0x60FF, &0i32.to_le_bytes())?;
        if let Some(original) = self.original_current_limit {
            backend.sdo_write(node, 0x6073, 0x00, &original.to_le_bytes())?;
        }

        self.state = HomingState::Homed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canopen::backend::FakeBackend;

    fn run_to_stall(homing: &mut CrudeHoming, backend: &mut FakeBackend, position: i32) {
        for _ in 0..(STALL_TICKS + 1) {
            backend.set_pdo(5, 0x6064, position.to_le_bytes().to_vec());
            homing.update(backend, 5).unwrap();
        }
    }

    #[test]
    fn single_stop_method_homes_after_one_stall() {
        let mut backend = FakeBackend::new();
        backend.set_pdo(5, 0x6075, 1500i32.to_le_bytes().to_vec());
        let mut homing = CrudeHoming::new(-1, 1, 1000, 200, 100);
        homing.start(&mut backend, 5).unwrap();
        run_to_stall(&mut homing, &mut backend, 0);
        assert_eq!(HomingState::Homed, homing.state());
    }

    #[test]
    fn two_stop_method_requires_both_stalls_and_checks_width() {
        let mut backend = FakeBackend::new();
        backend.set_pdo(5, 0x6075, 1500i32.to_le_bytes().to_vec());
        let mut homing = CrudeHoming::new(-3, 1, 1000, 200, 50);
        homing.start(&mut backend, 5).unwrap();
        run_to_stall(&mut homing, &mut backend, 0);
        assert_eq!(HomingState::Ongoing, homing.state());
        run_to_stall(&mut homing, &mut backend, 1000);
        assert_eq!(HomingState::Homed, homing.state());
    }

    #[test]
    fn travel_below_min_width_fails() {
        let mut backend = FakeBackend::new();
        backend.set_pdo(5, 0x6075, 1500i32.to_le_bytes().to_vec());
        let mut homing = CrudeHoming::new(-4, 1, 1000, 200, 500);
        homing.start(&mut backend, 5).unwrap();
        run_to_stall(&mut homing, &mut backend, 0);
        run_to_stall(&mut homing, &mut backend, 10);
        assert_eq!(HomingState::Failed, homing.state());
    }

    #[test]
    fn restores_original_current_limit_on_success() {
        let mut backend = FakeBackend::new();
        backend.set_pdo(5, 0x6075, 1500i32.to_le_bytes().to_vec());
        let mut homing = CrudeHoming::new(-1, 1, 1000, 200, 100);
        homing.start(&mut backend, 5).unwrap();
        run_to_stall(&mut homing, &mut backend, 0);
        let restored = backend
            .sdo_writes
            .iter()
            .any(|(_, index, _, bytes)| *index == 0x6073 && bytes == &1500i32.to_le_bytes().to_vec());
        assert!(restored);
    }

    #[test]
    fn single_stop_forward_offsets_encoder_so_the_stop_maps_to_zero() {
        let mut backend = FakeBackend::new();
        backend.set_pdo(5, 0x6075, 1500i32.to_le_bytes().to_vec());
        let mut homing = CrudeHoming::new(-1, 1, 1000, 200, 100);
        homing.start(&mut backend, 5).unwrap();
        run_to_stall(&mut homing, &mut backend, 300);
        assert_eq!(HomingState::Homed, homing.state());
        let offset = backend
            .sdo_writes
            .iter()
            .find(|(_, index, _, _)| *index == 0x607C)
            .map(|(_, _, _, bytes)| crate::util::i32_from_le_bytes(bytes).unwrap());
        assert_eq!(Some(300), offset);
    }

    #[test]
    fn single_stop_reverse_offsets_encoder_so_the_stop_maps_to_min_width() {
        let mut backend = FakeBackend::new();
        backend.set_pdo(5, 0x6075, 1500i32.to_le_bytes().to_vec());
        let mut homing = CrudeHoming::new(-2, -1, 1000, 200, 100);
        homing.start(&mut backend, 5).unwrap();
        run_to_stall(&mut homing, &mut backend, -300);
        assert_eq!(HomingState::Homed, homing.state());
        let offset = backend
            .sdo_writes
            .iter()
            .find(|(_, index, _, _)| *index == 0x607C)
            .map(|(_, _, _, bytes)| crate::util::i32_from_le_bytes(bytes).unwrap());
        assert_eq!(Some(-400), offset); // raw(-300) - mapped(min_width=100)
    }

    #[test]
    fn two_stop_method_offsets_against_the_stop_found_travelling_opposite_direction() {
        let mut backend = FakeBackend::new();
        backend.set_pdo(5, 0x6075, 1500i32.to_le_bytes().to_vec());
        let mut homing = CrudeHoming::new(-3, 1, 1000, 200, 50);
        homing.start(&mut backend, 5).unwrap();
        run_to_stall(&mut homing, &mut backend, 0);
        run_to_stall(&mut homing, &mut backend, 1000);
        assert_eq!(HomingState::Homed, homing.state());
        let offset = backend
            .sdo_writes
            .iter()
            .find(|(_, index, _, _)| *index == 0x607C)
            .map(|(_, _, _, bytes)| crate::util::i32_from_le_bytes(bytes).unwrap());
        assert_eq!(Some(1000), offset); // second_stop(1000) - mapped(0)
    }
}
