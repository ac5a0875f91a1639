//! Fixed-interval tick loop driving `Being::single_cycle`, a slower
//! telemetry sampler cadence, and cooperative `SIGTERM` shutdown.
//!
//! Both cadences run inside one `tokio::select!` rather than as separately
//! spawned tasks: `Being`'s block graph is built on `Rc`/`RefCell` (see
//! `block.rs`), which is not `Send`, so a multi-task `tokio::spawn` split
//! is unavailable without wrapping every port in a lock. A single
//! `select!` loop keeps the "one thread of execution" requirement without
//! paying for that.

use crate::being::Being;
use crate::canopen::CanBackend;
use crate::config::RuntimeConfig;
use crate::telemetry::{TelemetryRecord, TelemetrySampler};
use tokio::time::{self, Duration, Instant};

/// Emits a sampled telemetry record; the external broker (out of scope)
/// implements this to forward over a websocket.
pub trait TelemetrySink {
    fn send(&mut self, record: TelemetryRecord);
}

pub struct Scheduler {
    config: RuntimeConfig,
    cycle: u64,
    web_cycle: u64,
}

impl Scheduler {
    pub fn new(config: RuntimeConfig) -> Self {
        Scheduler {
            config,
            cycle: 0,
            web_cycle: 0,
        }
    }

    fn tick_deadline(&self, start: Instant) -> Instant {
        start + Duration::from_secs_f64(self.cycle as f64 * self.config.interval)
    }

    fn web_deadline(&self, start: Instant) -> Instant {
        start + Duration::from_secs_f64(self.web_cycle as f64 * self.config.web_interval)
    }

    /// Run until `shutdown` resolves (a `SIGTERM` future in production, an
    /// immediate-ready future in tests). Sleep-until-deadline never
    /// accumulates skew: if a deadline has already passed, the next sleep
    /// resolves immediately rather than stacking up the backlog.
    pub async fn run(
        &mut self,
        being: &mut Being,
        backend: &mut dyn CanBackend,
        sampler: &mut TelemetrySampler,
        sink: &mut dyn TelemetrySink,
        mut shutdown: impl std::future::Future<Output = ()> + Unpin,
    ) {
        let start = Instant::now();
        loop {
            let tick_at = self.tick_deadline(start);
            let web_at = self.web_deadline(start);

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("received shutdown signal, exiting tick loop");
                    return;
                }
                _ = time::sleep_until(tick_at) => {
                    being.single_cycle(backend);
                    self.cycle += 1;
                }
                _ = time::sleep_until(web_at) => {
                    let record = sampler.sample(being.clock().now());
                    sink.send(record);
                    self.web_cycle += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        records: Vec<TelemetryRecord>,
    }

    impl TelemetrySink for RecordingSink {
        fn send(&mut self, record: TelemetryRecord) {
            self.records.push(record);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_promptly_on_shutdown_signal() {
        use crate::being::{Being, Role};
        use crate::block::BlockIdAllocator;
        use crate::blocks::Sine;
        use crate::canopen::backend::FakeBackend;

        let mut alloc = BlockIdAllocator::new();
        let mut being = Being::new(
            vec![Role::Behavior(Box::new(Sine::new(alloc.alloc(), 1.0, 0.0, 0.01)))],
            vec![],
            0.01,
        );
        let mut backend = FakeBackend::new();
        let mut sampler = TelemetrySampler::new();
        let mut sink = RecordingSink { records: Vec::new() };
        let mut scheduler = Scheduler::new(RuntimeConfig::default());

        let shutdown = Box::pin(async {});
        scheduler
            .run(&mut being, &mut backend, &mut sampler, &mut sink, shutdown)
            .await;

        assert_eq!(0, being.clock().cycle());
    }

    #[tokio::test(start_paused = true)]
    async fn catches_up_after_a_stall_without_accumulating_drift() {
        use crate::being::{Being, Role};
        use crate::block::BlockIdAllocator;
        use crate::blocks::Sine;
        use crate::canopen::backend::{CanBackend, EmcyRecord, FakeBackend, NmtState, TransportError};
        use std::cell::RefCell;
        use std::rc::Rc;

        // Wraps `FakeBackend` to record, for every tick, how many seconds
        // had elapsed since the run started -- `update()` is called exactly
        // once per `Being::single_cycle`.
        struct RecordingBackend {
            inner: FakeBackend,
            start: Instant,
            offsets: Rc<RefCell<Vec<f64>>>,
        }

        impl CanBackend for RecordingBackend {
            fn scan_for_node_ids(&mut self) -> Result<Vec<u8>, TransportError> {
                self.inner.scan_for_node_ids()
            }
            fn send_pdo(&mut self, node: u8, index: u16, bytes: &[u8]) -> Result<(), TransportError> {
                self.inner.send_pdo(node, index, bytes)
            }
            fn read_pdo(&mut self, node: u8, index: u16) -> Result<Vec<u8>, TransportError> {
                self.inner.read_pdo(node, index)
            }
            fn sdo_read(&mut self, node: u8, index: u16, subindex: u8) -> Result<Vec<u8>, TransportError> {
                self.inner.sdo_read(node, index, subindex)
            }
            fn sdo_write(&mut self, node: u8, index: u16, subindex: u8, bytes: &[u8]) -> Result<(), TransportError> {
                self.inner.sdo_write(node, index, subindex, bytes)
            }
            fn nmt_set(&mut self, node: u8, state: NmtState) -> Result<(), TransportError> {
                self.inner.nmt_set(node, state)
            }
            fn emcy_consume(&mut self, node: u8) -> Vec<EmcyRecord> {
                self.inner.emcy_consume(node)
            }
            fn update(&mut self) -> Result<(), TransportError> {
                self.offsets.borrow_mut().push((Instant::now() - self.start).as_secs_f64());
                self.inner.update()
            }
        }

        let interval = 0.1;
        let offsets = Rc::new(RefCell::new(Vec::new()));
        let offsets_for_task = Rc::clone(&offsets);

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async move {
                let start = Instant::now();
                let mut alloc = BlockIdAllocator::new();
                let mut being = Being::new(
                    vec![Role::Behavior(Box::new(Sine::new(alloc.alloc(), 1.0, 0.0, interval)))],
                    vec![],
                    interval,
                );
                let mut config = RuntimeConfig::default();
                config.interval = interval;
                config.web_interval = 1000.0;

                let handle = tokio::task::spawn_local(async move {
                    let mut backend = RecordingBackend {
                        inner: FakeBackend::new(),
                        start,
                        offsets: offsets_for_task,
                    };
                    let mut sampler = TelemetrySampler::new();
                    let mut sink = RecordingSink { records: Vec::new() };
                    let mut scheduler = Scheduler::new(config);
                    let shutdown = Box::pin(time::sleep_until(start + Duration::from_secs_f64(2.5 * interval)));
                    scheduler
                        .run(&mut being, &mut backend, &mut sampler, &mut sink, shutdown)
                        .await;
                });

                // Let cycle 0 fire (its deadline is `start` itself) and the
                // task settle on cycle 1's deadline.
                tokio::task::yield_now().await;

                // Stall: wall time jumps past cycle 1's deadline (0.1s) but
                // not yet cycle 2's (0.2s).
                time::advance(Duration::from_secs_f64(1.5 * interval)).await;
                tokio::task::yield_now().await;

                handle.await.unwrap();
            })
            .await;

        let offsets = offsets.borrow();
        assert_eq!(3, offsets.len(), "expected cycles 0, 1 and 2 to have fired: {offsets:?}");
        assert!((offsets[0] - 0.0).abs() < 1e-9);
        assert!(
            (offsets[1] - 0.15).abs() < 1e-9,
            "cycle 1 should catch up the instant its deadline has passed: {offsets:?}"
        );
        assert!(
            (offsets[2] - 0.2).abs() < 1e-9,
            "cycle 2 must fire at start + 2*interval (0.2), not stall_point + interval (0.25): {offsets:?}"
        );
    }
}
