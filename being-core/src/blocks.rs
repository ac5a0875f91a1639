//! Demo signal-generator blocks.
//!
//! Not part of the motor control core, but `being/blocks.py`'s `Sine`/
//! `Trafo` pair is the canonical smallest-possible network for exercising
//! the graph/scheduler machinery: wiring a sine generator into a linear
//! transform gives a closed-form expected output at every tick.

use crate::block::{Block, BlockId};
use crate::connect::{pipe, ValuePorts};
use std::f64::consts::TAU;

/// Outputs `sin(phase)`, advancing `phase` by `TAU * frequency * interval`
/// each tick and wrapping into `[0, TAU)`.
pub struct Sine {
    id: BlockId,
    ports: ValuePorts,
    frequency_in: usize,
    output: usize,
    phase: f64,
    interval: f64,
}

impl Sine {
    pub fn new(id: BlockId, frequency: f64, start_phase: f64, interval: f64) -> Self {
        let mut ports = ValuePorts::new();
        let frequency_in = ports.add_input("frequency", frequency);
        let output = ports.add_output("output", start_phase.sin());
        Sine {
            id,
            ports,
            frequency_in,
            output,
            phase: start_phase,
            interval,
        }
    }

    pub fn ports(&self) -> &ValuePorts {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut ValuePorts {
        &mut self.ports
    }

    pub fn frequency_input_index(&self) -> usize {
        self.frequency_in
    }

    pub fn output_index(&self) -> usize {
        self.output
    }
}

impl Block for Sine {
    fn id(&self) -> BlockId {
        self.id
    }

    fn update(&mut self) {
        self.ports.output(self.output).set(self.phase.sin());
        let frequency = self.ports.input(self.frequency_in).get();
        self.phase += TAU * frequency * self.interval;
        self.phase %= TAU;
    }

    fn name(&self) -> &str {
        "Sine"
    }
}

/// Applies `output = scale * input + offset`.
pub struct Trafo {
    id: BlockId,
    ports: ValuePorts,
    input: usize,
    output: usize,
    scale: f64,
    offset: f64,
}

impl Trafo {
    pub fn new(id: BlockId, scale: f64, offset: f64) -> Self {
        let mut ports = ValuePorts::new();
        let input = ports.add_input("input", 0.0);
        let output = ports.add_output("output", offset);
        Trafo {
            id,
            ports,
            input,
            output,
            scale,
            offset,
        }
    }

    pub fn ports(&self) -> &ValuePorts {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut ValuePorts {
        &mut self.ports
    }

    pub fn input_index(&self) -> usize {
        self.input
    }

    pub fn output_index(&self) -> usize {
        self.output
    }
}

impl Block for Trafo {
    fn id(&self) -> BlockId {
        self.id
    }

    fn update(&mut self) {
        let value = self.scale * self.ports.input(self.input).get() + self.offset;
        self.ports.output(self.output).set(value);
    }

    fn name(&self) -> &str {
        "Trafo"
    }
}
