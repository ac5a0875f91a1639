//! Named port registries and the wiring operators blocks are connected with.
//!
//! Source blocks register ports under a name (or none, for the common
//! single-port case); `connect()` wires an output on one block's registry
//! to an input on another's by name, enforcing the single-binding and
//! single-candidate invariants rather than the duck-typed attribute
//! injection the dynamic original relied on.

use crate::block::{MessageInput, MessageOutput, ValueInput, ValueOutput};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("value input '{0}' is already bound to an output")]
    AlreadyConnected(String),
    #[error("port '{0}' does not exist")]
    UnknownPort(String),
    #[error("ambiguous port selection: block has {0} candidate ports, need exactly one")]
    AmbiguousPort(usize),
}

/// A block's named value ports. Values are SI-unit scalars (`f64`); this
/// matches every value-port use in the controller and behavior blocks.
#[derive(Debug, Default)]
pub struct ValuePorts {
    inputs: Vec<(String, ValueInput<f64>, bool)>,
    outputs: Vec<(String, ValueOutput<f64>)>,
}

impl ValuePorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unbound input defaulting to `default`; returns its index.
    pub fn add_input(&mut self, name: impl Into<String>, default: f64) -> usize {
        let idx = self.inputs.len();
        self.inputs
            .push((name.into(), ValueOutput::new(default).as_input(), false));
        idx
    }

    pub fn add_output(&mut self, name: impl Into<String>, initial: f64) -> usize {
        let idx = self.outputs.len();
        self.outputs.push((name.into(), ValueOutput::new(initial)));
        idx
    }

    pub fn output(&self, idx: usize) -> &ValueOutput<f64> {
        &self.outputs[idx].1
    }

    pub fn input(&self, idx: usize) -> &ValueInput<f64> {
        &self.inputs[idx].1
    }

    pub fn output_by_name(&self, name: &str) -> Result<usize, ConnectError> {
        self.outputs
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| ConnectError::UnknownPort(name.to_string()))
    }

    pub fn input_by_name(&self, name: &str) -> Result<usize, ConnectError> {
        self.inputs
            .iter()
            .position(|(n, _, _)| n == name)
            .ok_or_else(|| ConnectError::UnknownPort(name.to_string()))
    }

    /// Bind the input at `in_idx` to read from `output`. Rebinding an
    /// already-bound input is rejected with `AlreadyConnected`.
    pub fn connect(&mut self, output: &ValueOutput<f64>, in_idx: usize) -> Result<(), ConnectError> {
        let (name, _, bound) = &self.inputs[in_idx];
        if *bound {
            return Err(ConnectError::AlreadyConnected(name.clone()));
        }
        self.inputs[in_idx] = (self.inputs[in_idx].0.clone(), output.as_input(), true);
        Ok(())
    }

    /// The sole input, if there is exactly one registered.
    pub fn sole_input(&self) -> Result<usize, ConnectError> {
        if self.inputs.len() == 1 {
            Ok(0)
        } else {
            Err(ConnectError::AmbiguousPort(self.inputs.len()))
        }
    }

    /// The sole output, if there is exactly one registered.
    pub fn sole_output(&self) -> Result<usize, ConnectError> {
        if self.outputs.len() == 1 {
            Ok(0)
        } else {
            Err(ConnectError::AmbiguousPort(self.outputs.len()))
        }
    }
}

/// Wire the sole output of `src` to the sole input of `dst`, the `a | b`
/// pipe composition. Fails with `AmbiguousPort` if either side does not
/// have exactly one candidate port.
pub fn pipe(src: &ValuePorts, dst: &mut ValuePorts) -> Result<(), ConnectError> {
    let out_idx = src.sole_output()?;
    let in_idx = dst.sole_input()?;
    dst.connect(src.output(out_idx), in_idx)
}

/// A block's named message ports, generic over the event payload type.
#[derive(Debug)]
pub struct MessagePorts<M: Clone> {
    inputs: Vec<(String, MessageInput<M>)>,
    outputs: Vec<(String, MessageOutput<M>)>,
}

impl<M: Clone> Default for MessagePorts<M> {
    fn default() -> Self {
        MessagePorts {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

impl<M: Clone> MessagePorts<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, name: impl Into<String>) -> usize {
        let idx = self.inputs.len();
        self.inputs.push((name.into(), MessageInput::new()));
        idx
    }

    pub fn add_output(&mut self, name: impl Into<String>) -> usize {
        let idx = self.outputs.len();
        self.outputs.push((name.into(), MessageOutput::new()));
        idx
    }

    pub fn output(&self, idx: usize) -> &MessageOutput<M> {
        &self.outputs[idx].1
    }

    pub fn input(&self, idx: usize) -> &MessageInput<M> {
        &self.inputs[idx].1
    }

    /// Subscribe the input at `in_idx` to `output`'s fan-out list.
    /// Connecting the same pair twice appends a second subscription; the
    /// `Being` wiring layer tracks issued `(output id, input id)` pairs so
    /// a given edge is only ever connected once.
    pub fn connect(&self, output: &MessageOutput<M>, in_idx: usize) {
        output.connect(&self.inputs[in_idx].1);
    }
}
