//! Shared helpers for the cucumber scenarios in `tests/being.rs`: building
//! the demo sine/trafo network and a hard-stop-homing motor fixture
//! in-process, against `being_core::canopen::backend::FakeBackend` rather
//! than a live CAN socket.

use being_core::being::{Being, Role};
use being_core::block::{BlockIdAllocator, ValueOutput};
use being_core::blocks::{Sine, Trafo};
use being_core::canopen::backend::{CanBackend, FakeBackend};
use being_core::canopen::CanNode;
use being_core::canopen::ObjectDictionary;
use being_core::connect::pipe;
use being_core::controller::Controller;
use being_core::motor::Motor;
use being_core::vendor::{Epos4, Mclm3002};

/// Builds `Sine(freq) -> Trafo(scale, offset)` and hands back a cloned
/// handle onto the trafo's output cell so a scenario can sample it after
/// every tick without reaching back into the moved `Being`.
pub fn sine_trafo_network(frequency: f64, scale: f64, offset: f64, interval: f64) -> (Being, ValueOutput<f64>) {
    let mut alloc = BlockIdAllocator::new();
    let sine_id = alloc.alloc();
    let trafo_id = alloc.alloc();

    let mut sine = Sine::new(sine_id, frequency, 0.0, interval);
    let mut trafo = Trafo::new(trafo_id, scale, offset);
    pipe(sine.ports(), trafo.ports_mut()).expect("sole output/input on demo blocks");
    let observer = trafo.ports().output(trafo.output_index()).clone();

    let being = Being::new(
        vec![Role::Behavior(Box::new(sine)), Role::Behavior(Box::new(trafo))],
        vec![(sine_id, trafo_id)],
        interval,
    );
    (being, observer)
}

pub fn feedback_cycle_network(interval: f64) -> Being {
    // A -> B -> A: a feedback loop, exercises back-edge removal.
    let mut alloc = BlockIdAllocator::new();
    let a_id = alloc.alloc();
    let b_id = alloc.alloc();

    let a = Trafo::new(a_id, 1.0, 0.0);
    let b = Trafo::new(b_id, 1.0, 0.0);

    Being::new(
        vec![Role::Behavior(Box::new(a)), Role::Behavior(Box::new(b))],
        vec![(a_id, b_id), (b_id, a_id)],
        interval,
    )
}

/// A -> B -> C -> A: a three-node feedback loop, exercises back-edge
/// removal on a longer cycle.
pub fn three_node_cycle_network(interval: f64) -> Being {
    let mut alloc = BlockIdAllocator::new();
    let a_id = alloc.alloc();
    let b_id = alloc.alloc();
    let c_id = alloc.alloc();

    let a = Trafo::new(a_id, 1.0, 0.0);
    let b = Trafo::new(b_id, 1.0, 0.0);
    let c = Trafo::new(c_id, 1.0, 0.0);

    Being::new(
        vec![Role::Behavior(Box::new(a)), Role::Behavior(Box::new(b)), Role::Behavior(Box::new(c))],
        vec![(a_id, b_id), (b_id, c_id), (c_id, a_id)],
        interval,
    )
}

/// A Faulhaber-profile motor controller with a hard-stop-capable homing
/// method, fed by an in-memory `FakeBackend`.
pub fn mclm3002_controller(
    id: being_core::pubsub::MotorId,
    state_switch_timeout: u32,
    backend: &mut dyn CanBackend,
) -> Controller {
    let node = CanNode::new(5, ObjectDictionary::new(), state_switch_timeout);
    let motor = Motor::new("LM1247", 1_000_000.0, 1_000_000.0, vec![-4, -3, -2, -1, 17, 18]);
    let vendor = Box::new(Mclm3002 {
        homing_velocity: 2000,
        safe_current_limit: 300,
        min_width: 1000,
    });
    Controller::new(id, node, motor, 1, -100_000, 100_000, vendor, state_switch_timeout, backend)
        .expect("fake backend never fails controller construction")
}

/// A controller over a `[0, length]` travel range at `1e6 device units per
/// SI metre`, for the homing-gating scenario: `lower=0`, `upper=length *
/// 1e6`, `direction` mirrors commanded positions when negative.
pub fn homing_gated_controller(
    id: being_core::pubsub::MotorId,
    length: f64,
    direction: i8,
    backend: &mut dyn CanBackend,
) -> Controller {
    let node = CanNode::new(5, ObjectDictionary::new(), 50);
    let motor = Motor::new("test", 1_000_000.0, 1_000_000.0, vec![17, 18]);
    let vendor = Box::new(Mclm3002 {
        homing_velocity: 1000,
        safe_current_limit: 200,
        min_width: 100,
    });
    let upper = (length * 1_000_000.0).round() as i32;
    Controller::new(id, node, motor, direction, 0, upper, vendor, 50, backend)
        .expect("fake backend never fails controller construction")
}

/// A Maxon Epos4 controller with RPDO-timeout auto-recovery enabled, fed
/// by an in-memory `FakeBackend`.
pub fn epos4_controller(
    id: being_core::pubsub::MotorId,
    state_switch_timeout: u32,
    backend: &mut dyn CanBackend,
) -> Controller {
    let node = CanNode::new(7, ObjectDictionary::new(), state_switch_timeout);
    let motor = Motor::new("EC-90", 1_000_000.0, 1_000_000.0, vec![17, 18, 35]);
    let vendor = Box::new(Epos4::new(true, true, 1.0));
    Controller::new(id, node, motor, 1, -100_000, 100_000, vendor, state_switch_timeout, backend)
        .expect("fake backend never fails controller construction")
}

pub fn fake_backend() -> FakeBackend {
    FakeBackend::new()
}
