//! Telemetry sampler: the second, slower-cadence cycle that snapshots
//! output values and drains pre-attached message inputs into a
//! JSON-serializable `being-state` record.
//!
//! Grounded on `original_source/being/awakening.py`'s
//! `_send_being_state_to_front_end`: a dummy `MessageInput` is attached to
//! every message output at startup purely so the sampler can drain it
//! without interfering with the block network's own subscribers.

use serde::Serialize;

/// One `"being-state"` record, emitted once per `WEB_INTERVAL`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TelemetryRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: f64,
    pub values: Vec<f64>,
    pub messages: Vec<Vec<String>>,
}

impl TelemetryRecord {
    pub fn new(timestamp: f64, values: Vec<f64>, messages: Vec<Vec<String>>) -> Self {
        TelemetryRecord {
            kind: "being-state",
            timestamp,
            values,
            messages,
        }
    }
}

/// One `"motor-event"` record, published as state/homing/error events
/// occur rather than batched to the sampler cadence.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MotorEventRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: &'static str,
    pub motor: usize,
    pub payload: String,
}

impl From<&crate::pubsub::MotorEvent> for MotorEventRecord {
    fn from(event: &crate::pubsub::MotorEvent) -> Self {
        let payload = match event {
            crate::pubsub::MotorEvent::StateChanged { state, .. } => state.clone(),
            crate::pubsub::MotorEvent::HomingChanged { state, .. } => state.clone(),
            crate::pubsub::MotorEvent::Error { message, .. } => message.clone(),
        };
        MotorEventRecord {
            kind: "motor-event",
            event: event.kind(),
            motor: event.motor().raw(),
            payload,
        }
    }
}

/// Samples a fixed list of value outputs and message inputs each time
/// `sample()` is called. Atomic per sample: values are read after the
/// network tick that produced them has fully completed, since the
/// sampler and tick loop share one thread and never interleave mid-tick.
pub struct TelemetrySampler {
    value_readers: Vec<Box<dyn Fn() -> f64>>,
    message_drains: Vec<Box<dyn FnMut() -> Vec<String>>>,
}

impl Default for TelemetrySampler {
    fn default() -> Self {
        TelemetrySampler {
            value_readers: Vec::new(),
            message_drains: Vec::new(),
        }
    }
}

impl TelemetrySampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_value(&mut self, reader: impl Fn() -> f64 + 'static) {
        self.value_readers.push(Box::new(reader));
    }

    pub fn watch_messages(&mut self, drain: impl FnMut() -> Vec<String> + 'static) {
        self.message_drains.push(Box::new(drain));
    }

    pub fn sample(&mut self, timestamp: f64) -> TelemetryRecord {
        let values = self.value_readers.iter().map(|read| read()).collect();
        let messages = self.message_drains.iter_mut().map(|drain| drain()).collect();
        TelemetryRecord::new(timestamp, values, messages)
    }
}
