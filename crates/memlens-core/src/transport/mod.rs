//! Out-of-band access to the target's memory
//!
//! The core never attaches to the target itself. Whatever performs the
//! physical reads (a DMA device, a driver, a dump file) is injected as a
//! [`Transport`]. Calls carry no atomicity guarantees across each other.

mod region;
mod snapshot;

#[cfg(test)]
pub mod mock;

use std::collections::HashMap;

use thiserror::Error;

pub use region::{MemoryRegion, RegionMap};
pub use snapshot::{SnapshotFile, SnapshotRegion, SnapshotTransport};

#[cfg(test)]
pub use mock::MockTransport;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("address {address:#x} (+{length}) is not mapped")]
    Unmapped { address: u64, length: usize },

    #[error("short read at {address:#x}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        address: u64,
        wanted: usize,
        got: usize,
    },

    #[error("target disconnected")]
    Disconnected,

    #[error("{0}")]
    Other(String),
}

/// One entry of a physical scatter transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterRequest {
    /// Transaction-local key, not an address
    pub key: u32,
    pub address: u64,
    pub length: usize,
}

/// Per-entry outcome of a scatter transaction
pub type ScatterResults = HashMap<u32, Result<Vec<u8>, TransportError>>;

/// The injected read/write capability.
///
/// Implementations must be callable from several threads at once. Each
/// call is independent; nothing is promised about the target's state
/// between two calls.
pub trait Transport: Send + Sync {
    /// Read `length` bytes at `address`.
    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, TransportError>;

    /// Write `data` at `address`.
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<(), TransportError>;

    /// Base address of a loaded module, if the target has it loaded.
    fn module_base(&self, module_name: &str) -> Option<u64>;

    /// Execute many reads as one physical transaction.
    ///
    /// The outer error means the whole transaction failed; inner errors are
    /// per entry. The default issues one `read_bytes` per entry, which is
    /// correct but forfeits batching.
    fn read_scatter(&self, entries: &[ScatterRequest]) -> Result<ScatterResults, TransportError> {
        Ok(entries
            .iter()
            .map(|entry| (entry.key, self.read_bytes(entry.address, entry.length)))
            .collect())
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_bytes(address, length)
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_bytes(address, data)
    }

    fn module_base(&self, module_name: &str) -> Option<u64> {
        (**self).module_base(module_name)
    }

    fn read_scatter(&self, entries: &[ScatterRequest]) -> Result<ScatterResults, TransportError> {
        (**self).read_scatter(entries)
    }
}
