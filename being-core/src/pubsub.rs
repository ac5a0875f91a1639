//! Synchronous pub/sub bus for motor events.
//!
//! Delivery is in-line: `publish()` runs every subscriber before
//! returning. Subscribers must not publish back onto the same bus from
//! inside their callback -- `MotorEventBus` tracks a re-entrancy flag and
//! panics rather than silently deadlocking or dropping the nested event,
//! since a re-entrant publish is a programming error, not a runtime
//! condition to recover from.

use std::cell::Cell;
use std::fmt;

/// A motor's controller identity in telemetry and event records.
pub type MotorId = crate::block::BlockId;

/// The three motor event kinds a `Controller` publishes, per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MotorEvent {
    StateChanged { motor: MotorId, state: String },
    HomingChanged { motor: MotorId, state: String },
    Error { motor: MotorId, message: String },
}

impl MotorEvent {
    pub fn motor(&self) -> MotorId {
        match self {
            MotorEvent::StateChanged { motor, .. } => *motor,
            MotorEvent::HomingChanged { motor, .. } => *motor,
            MotorEvent::Error { motor, .. } => *motor,
        }
    }

    /// The `"event"` discriminant used in the `motor-event` telemetry record.
    pub fn kind(&self) -> &'static str {
        match self {
            MotorEvent::StateChanged { .. } => "STATE_CHANGED",
            MotorEvent::HomingChanged { .. } => "HOMING_CHANGED",
            MotorEvent::Error { .. } => "ERROR",
        }
    }
}

impl fmt::Display for MotorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorEvent::StateChanged { motor, state } => {
                write!(f, "motor {:?} state -> {}", motor, state)
            }
            MotorEvent::HomingChanged { motor, state } => {
                write!(f, "motor {:?} homing -> {}", motor, state)
            }
            MotorEvent::Error { motor, message } => {
                write!(f, "motor {:?} error: {}", motor, message)
            }
        }
    }
}

type Subscriber = Box<dyn FnMut(&MotorEvent)>;

/// A single publisher's subscriber list. One bus per `Controller`; the
/// telemetry sampler and the log sink both subscribe to every controller's
/// bus.
pub struct MotorEventBus {
    subscribers: Vec<Subscriber>,
    publishing: Cell<bool>,
}

impl Default for MotorEventBus {
    fn default() -> Self {
        MotorEventBus {
            subscribers: Vec::new(),
            publishing: Cell::new(false),
        }
    }
}

impl MotorEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&MotorEvent) + 'static) {
        self.subscribers.push(Box::new(handler));
    }

    /// Deliver `event` to every subscriber in registration order.
    ///
    /// # Panics
    /// Panics if called again while a prior `publish()` call on this bus
    /// is still running (a subscriber tried to publish back onto it).
    pub fn publish(&mut self, event: MotorEvent) {
        if self.publishing.get() {
            panic!("re-entrant publish on MotorEventBus: {event}");
        }
        self.publishing.set(true);
        for subscriber in self.subscribers.iter_mut() {
            subscriber(&event);
        }
        self.publishing.set(false);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockIdAllocator;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn delivers_to_every_subscriber_in_order() {
        let mut alloc = BlockIdAllocator::new();
        let motor = alloc.alloc();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut bus = MotorEventBus::new();
        let seen_a = Rc::clone(&seen);
        bus.subscribe(move |e| seen_a.borrow_mut().push(format!("a:{}", e.kind())));
        let seen_b = Rc::clone(&seen);
        bus.subscribe(move |e| seen_b.borrow_mut().push(format!("b:{}", e.kind())));

        bus.publish(MotorEvent::StateChanged {
            motor,
            state: "OPERATION_ENABLED".into(),
        });

        assert_eq!(vec!["a:STATE_CHANGED", "b:STATE_CHANGED"], *seen.borrow());
    }

    #[test]
    #[should_panic(expected = "re-entrant publish")]
    fn republishing_from_a_subscriber_panics() {
        let mut alloc = BlockIdAllocator::new();
        let motor = alloc.alloc();
        let bus = Rc::new(RefCell::new(MotorEventBus::new()));

        let bus_in_handler = Rc::clone(&bus);
        bus.borrow_mut().subscribe(move |_event| {
            bus_in_handler.borrow_mut().publish(MotorEvent::Error {
                motor,
                message: "nested".into(),
            });
        });

        bus.borrow_mut().publish(MotorEvent::StateChanged {
            motor,
            state: "FAULT".into(),
        });
    }

    #[test]
    fn event_kind_matches_telemetry_discriminant() {
        let mut alloc = BlockIdAllocator::new();
        let motor = alloc.alloc();
        assert_eq!(
            "HOMING_CHANGED",
            MotorEvent::HomingChanged {
                motor,
                state: "HOMED".into()
            }
            .kind()
        );
    }
}
