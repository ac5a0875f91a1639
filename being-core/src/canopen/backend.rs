//! The CAN transport capability `CanNode` drives NMT/SDO/PDO/EMCY over.
//!
//! The transport driver itself is out of scope; this trait is the seam the
//! core depends on. Grounded on the `cot` CLI, which talks to a
//! `tokio_socketcan::CANSocket` through exactly these primitives (scan, SDO
//! read/write, PDO send, NMT set) -- here expressed as a trait object so
//! `Controller`/`CanNode` stay transport-agnostic and testable against an
//! in-memory fake.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransportError {
    #[error("CAN backend unavailable: {0}")]
    Unavailable(String),
    #[error("SDO request to node {node} index {index:#06x}:{subindex:#04x} timed out")]
    SdoTimeout { node: u8, index: u16, subindex: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtState {
    Initialisation,
    PreOperational,
    Operational,
    Stopped,
}

/// An emergency record as surfaced by `emcy_consume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmcyRecord {
    pub code: u16,
    pub register: u8,
}

/// Abstract CAN transport used by `CanNode`. `pdo`/`sdo` operations are
/// expected to be non-blocking and queue-backed on the `pdo` side; `sdo`
/// may block synchronously (matches the `how ∈ {'sdo', 'pdo'}` transport
/// choice on state-switch jobs).
pub trait CanBackend {
    fn scan_for_node_ids(&mut self) -> Result<Vec<u8>, TransportError>;

    fn send_pdo(&mut self, node: u8, index: u16, bytes: &[u8]) -> Result<(), TransportError>;
    fn read_pdo(&mut self, node: u8, index: u16) -> Result<Vec<u8>, TransportError>;

    fn sdo_read(&mut self, node: u8, index: u16, subindex: u8) -> Result<Vec<u8>, TransportError>;
    fn sdo_write(&mut self, node: u8, index: u16, subindex: u8, bytes: &[u8]) -> Result<(), TransportError>;

    fn nmt_set(&mut self, node: u8, state: NmtState) -> Result<(), TransportError>;

    fn emcy_consume(&mut self, node: u8) -> Vec<EmcyRecord>;

    /// Per-tick flush: send queued PDO frames, poll for arrivals.
    fn update(&mut self) -> Result<(), TransportError>;
}

/// In-memory backend for tests: records every outbound call and lets the
/// test script queue inbound PDO/EMCY data. Available under the `testing`
/// feature so integration-test crates (the cucumber suite) can build
/// fixtures against it without a real CAN bus.
#[cfg(any(test, feature = "testing"))]
pub struct FakeBackend {
    pub pdo_writes: Vec<(u8, u16, Vec<u8>)>,
    pub sdo_writes: Vec<(u8, u16, u8, Vec<u8>)>,
    pub pdo_reads: std::collections::HashMap<(u8, u16), Vec<u8>>,
    pub pending_emcy: std::collections::HashMap<u8, Vec<EmcyRecord>>,
}

#[cfg(any(test, feature = "testing"))]
impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend {
            pdo_writes: Vec::new(),
            sdo_writes: Vec::new(),
            pdo_reads: std::collections::HashMap::new(),
            pending_emcy: std::collections::HashMap::new(),
        }
    }

    pub fn set_pdo(&mut self, node: u8, index: u16, bytes: Vec<u8>) {
        self.pdo_reads.insert((node, index), bytes);
    }

    pub fn queue_emcy(&mut self, node: u8, record: EmcyRecord) {
        self.pending_emcy.entry(node).or_default().push(record);
    }
}

#[cfg(any(test, feature = "testing"))]
impl CanBackend for FakeBackend {
    fn scan_for_node_ids(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.pdo_reads.keys().map(|(n, _)| *n).collect())
    }

    fn send_pdo(&mut self, node: u8, index: u16, bytes: &[u8]) -> Result<(), TransportError> {
        self.pdo_writes.push((node, index, bytes.to_vec()));
        Ok(())
    }

    fn read_pdo(&mut self, node: u8, index: u16) -> Result<Vec<u8>, TransportError> {
        Ok(self.pdo_reads.get(&(node, index)).cloned().unwrap_or_default())
    }

    fn sdo_read(&mut self, node: u8, index: u16, _subindex: u8) -> Result<Vec<u8>, TransportError> {
        Ok(self.pdo_reads.get(&(node, index)).cloned().unwrap_or_default())
    }

    fn sdo_write(&mut self, node: u8, index: u16, subindex: u8, bytes: &[u8]) -> Result<(), TransportError> {
        self.sdo_writes.push((node, index, subindex, bytes.to_vec()));
        Ok(())
    }

    fn nmt_set(&mut self, _node: u8, _state: NmtState) -> Result<(), TransportError> {
        Ok(())
    }

    fn emcy_consume(&mut self, node: u8) -> Vec<EmcyRecord> {
        self.pending_emcy.remove(&node).unwrap_or_default()
    }

    fn update(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
