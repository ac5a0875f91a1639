//! Block identity and the port kinds blocks are wired together with.
//!
//! A value port holds the latest value written to it (scalar, overwrite
//! semantics); a message port is a FIFO queue with fan-out to every
//! connected input. Both are backed by `Rc`-shared interior mutability
//! rather than a trait-object back-reference from port to owning block --
//! Rust has no equivalent to following a live Python object reference from
//! a bare port, so the block graph is built from an explicit vertex/edge
//! list instead (see `graph.rs`, `connect.rs`).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Opaque identifier for a block, used as the vertex type in `graph::Graph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    pub fn from_raw(raw: usize) -> Self {
        BlockId(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Monotonic counter handing out fresh `BlockId`s within a single `Being`.
#[derive(Debug, Default)]
pub struct BlockIdAllocator {
    next: usize,
}

impl BlockIdAllocator {
    pub fn new() -> Self {
        BlockIdAllocator { next: 0 }
    }

    pub fn alloc(&mut self) -> BlockId {
        let id = BlockId(self.next);
        self.next += 1;
        id
    }
}

/// A single-value, overwrite-on-write, latest-value-on-read port.
#[derive(Debug, Clone)]
pub struct ValueOutput<T: Copy> {
    cell: Rc<Cell<T>>,
}

impl<T: Copy + Default> Default for ValueOutput<T> {
    fn default() -> Self {
        ValueOutput {
            cell: Rc::new(Cell::new(T::default())),
        }
    }
}

impl<T: Copy> ValueOutput<T> {
    pub fn new(initial: T) -> Self {
        ValueOutput {
            cell: Rc::new(Cell::new(initial)),
        }
    }

    pub fn set(&self, value: T) {
        self.cell.set(value);
    }

    pub fn get(&self) -> T {
        self.cell.get()
    }

    /// A reader handle sharing this output's cell; connecting a value input
    /// is simply cloning the output's handle.
    pub fn as_input(&self) -> ValueInput<T> {
        ValueInput {
            cell: Rc::clone(&self.cell),
        }
    }
}

/// Reader side of a value connection. Always reflects the latest value
/// written to the output it is connected to.
#[derive(Debug, Clone)]
pub struct ValueInput<T: Copy> {
    cell: Rc<Cell<T>>,
}

impl<T: Copy> ValueInput<T> {
    pub fn get(&self) -> T {
        self.cell.get()
    }
}

/// A fan-out message output: every connected input receives every message.
#[derive(Debug)]
pub struct MessageOutput<T> {
    subscribers: RefCell<Vec<Rc<RefCell<VecDeque<T>>>>>,
}

impl<T> Default for MessageOutput<T> {
    fn default() -> Self {
        MessageOutput {
            subscribers: RefCell::new(Vec::new()),
        }
    }
}

impl<T: Clone> MessageOutput<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, input: &MessageInput<T>) {
        self.subscribers.borrow_mut().push(Rc::clone(&input.queue));
    }

    pub fn send(&self, message: T) {
        for queue in self.subscribers.borrow().iter() {
            queue.borrow_mut().push_back(message.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

/// Reader side of a message connection: a private FIFO queue fed by every
/// connected output.
#[derive(Debug, Clone)]
pub struct MessageInput<T> {
    queue: Rc<RefCell<VecDeque<T>>>,
}

impl<T> Default for MessageInput<T> {
    fn default() -> Self {
        MessageInput {
            queue: Rc::new(RefCell::new(VecDeque::new())),
        }
    }
}

impl<T> MessageInput<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn drain(&self) -> Vec<T> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

/// Behavior every block in the network implements. `update()` must not
/// block: it runs once per cycle inside the single scheduler loop.
pub trait Block {
    fn id(&self) -> BlockId;

    fn update(&mut self);

    /// Human-readable name for diagnostics and telemetry labeling.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_output_reflects_latest_write() {
        let output = ValueOutput::new(0.0f64);
        let input = output.as_input();
        assert_eq!(0.0, input.get());
        output.set(1.5);
        assert_eq!(1.5, input.get());
    }

    #[test]
    fn message_output_fans_out_to_every_input() {
        let output: MessageOutput<i32> = MessageOutput::new();
        let a = MessageInput::new();
        let b = MessageInput::new();
        output.connect(&a);
        output.connect(&b);

        output.send(42);

        assert_eq!(Some(42), a.pop());
        assert_eq!(Some(42), b.pop());
        assert_eq!(None, a.pop());
    }

    #[test]
    fn message_input_is_fifo() {
        let output: MessageOutput<i32> = MessageOutput::new();
        let input = MessageInput::new();
        output.connect(&input);
        output.send(1);
        output.send(2);
        assert_eq!(vec![1, 2], input.drain());
    }

    #[test]
    fn allocator_hands_out_distinct_ids() {
        let mut alloc = BlockIdAllocator::new();
        let a = alloc.alloc();
        let b = alloc.alloc();
        assert_ne!(a, b);
    }
}
