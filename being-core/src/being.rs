//! `Being`: the façade composing a block set, its execution order, and the
//! role-filtered collections (motors/behaviors/motion players) the
//! scheduler and telemetry sampler operate on.
//!
//! Grounded on `original_source/being/being.py`'s `Being` class; the
//! duck-typed "walk reachable blocks from a seed" discovery has no clean
//! Rust equivalent (it would need `Weak<RefCell<dyn Block>>` back-edges
//! from every port to its owning block just to support partial seeds), so
//! `Being::new` takes the full block set directly and still builds the
//! `Graph`/execution order exactly as specified.

use crate::block::{Block, BlockId};
use crate::canopen::CanBackend;
use crate::clock::Clock;
use crate::controller::Controller;
use crate::graph::{topological_sort, Edge, Graph};

/// A block tagged with its role, so `Being` can filter the curated
/// `motors`/`behaviors`/`motion_players` collections after sorting.
pub enum Role {
    Motor(Controller),
    Behavior(Box<dyn Block>),
    MotionPlayer(Box<dyn Block>),
}

impl Role {
    fn id(&self) -> BlockId {
        match self {
            Role::Motor(c) => c.id(),
            Role::Behavior(b) => b.id(),
            Role::MotionPlayer(b) => b.id(),
        }
    }
}

pub struct Being {
    order: Vec<BlockId>,
    clock: Clock,
    blocks: Vec<Role>,
}

impl Being {
    /// `blocks` is the full block set (not a discovery seed); `edges` is
    /// the source-block → destination-block wiring derived from
    /// output→input connections made while constructing those blocks.
    pub fn new(blocks: Vec<Role>, edges: Vec<Edge>, interval: f64) -> Self {
        let vertices: Vec<BlockId> = blocks.iter().map(Role::id).collect();
        let graph = Graph::new(vertices, edges);
        let order = topological_sort(&graph);
        Being {
            order,
            clock: Clock::new(interval),
            blocks,
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn execution_order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn motors(&self) -> impl Iterator<Item = &Controller> {
        self.blocks.iter().filter_map(|r| match r {
            Role::Motor(c) => Some(c),
            _ => None,
        })
    }

    pub fn motors_mut(&mut self) -> impl Iterator<Item = &mut Controller> {
        self.blocks.iter_mut().filter_map(|r| match r {
            Role::Motor(c) => Some(c),
            _ => None,
        })
    }

    fn block_mut(&mut self, id: BlockId) -> Option<&mut (dyn Block + '_)> {
        match self.blocks.iter_mut().find(|r| r.id() == id) {
            Some(Role::Behavior(b)) => Some(b.as_mut()),
            Some(Role::MotionPlayer(b)) => Some(b.as_mut()),
            Some(Role::Motor(_)) | None => None,
        }
    }

    /// Run every block's `update()` once, in topological order. Motor
    /// controllers are driven separately via `drive_motors` since their
    /// `update()` needs the CAN backend, not the block-graph `Block`
    /// interface.
    fn execute(&mut self) {
        let order = self.order.clone();
        for id in order {
            if let Some(block) = self.block_mut(id) {
                block.update();
            }
        }
    }

    /// Drive every motor controller's per-tick CiA-402 sequence. Runs
    /// after `execute()` so target positions written by behavior/motion
    /// blocks this tick are visible to a controller appearing later in
    /// the execution order; controllers earlier in the order see last
    /// tick's target, matching the back-edge-delay guarantee.
    fn drive_motors(&mut self, backend: &mut dyn CanBackend) {
        for controller in self.motors_mut() {
            if let Err(err) = controller.update(backend) {
                log::error!("controller {:?} tick failed: {err}", controller.id());
            }
        }
    }

    /// `execute(order)`, then motor controller ticks, then
    /// `backend.update()` (flush TX / poll RX), then `clock.step()`.
    pub fn single_cycle(&mut self, backend: &mut dyn CanBackend) {
        self.execute();
        self.drive_motors(backend);
        if let Err(err) = backend.update() {
            log::error!("CAN backend flush failed: {err}");
        }
        self.clock.step();
    }

    /// Start every motor's enable transition as an independent job.
    pub fn enable_motors(&mut self, backend: &mut dyn CanBackend) {
        for controller in self.motors_mut() {
            if let Err(err) = controller.enable(backend) {
                log::error!("enable failed for motor {:?}: {err}", controller.id());
            }
        }
    }

    /// Start every motor's homing job using its configured defaults.
    pub fn home_motors(&mut self, backend: &mut dyn CanBackend) {
        for controller in self.motors_mut() {
            if let Err(err) = controller.home(backend, None, None) {
                log::error!("homing failed to start for motor {:?}: {err}", controller.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockIdAllocator;
    use crate::blocks::Sine;
    use crate::canopen::backend::FakeBackend;

    #[test]
    fn single_cycle_advances_clock_by_exactly_one_tick() {
        let mut alloc = BlockIdAllocator::new();
        let sine = Sine::new(alloc.alloc(), 1.0, 0.0, 0.01);
        let mut being = Being::new(vec![Role::Behavior(Box::new(sine))], vec![], 0.01);
        let mut backend = FakeBackend::new();

        assert_eq!(0, being.clock().cycle());
        being.single_cycle(&mut backend);
        assert_eq!(1, being.clock().cycle());
    }

    #[test]
    fn execution_order_covers_every_block_exactly_once() {
        let mut alloc = BlockIdAllocator::new();
        let a = alloc.alloc();
        let b = alloc.alloc();
        let being = Being::new(
            vec![
                Role::Behavior(Box::new(Sine::new(a, 1.0, 0.0, 0.01))),
                Role::Behavior(Box::new(Sine::new(b, 1.0, 0.0, 0.01))),
            ],
            vec![(a, b)],
            0.01,
        );
        assert_eq!(2, being.execution_order().len());
    }
}
