//! Scatter-read engine
//!
//! Turns many independent reads into few physical transactions. The
//! transport is expensive per call and cheap per byte once batched, so
//! every multi-read operation in this crate goes through a [`Cycle`].
//!
//! The engine never retries. A failed read is a missing key; callers
//! re-issue on their next cycle.

mod cycle;
mod key;
mod result;
mod value;

use std::sync::Arc;

use crate::address::AddressGate;
use crate::error::{Error, Result};
use crate::strings::{StringEncoding, decode_c_string};
use crate::transport::{Transport, TransportError};

pub use cycle::{Cycle, CycleReport, Planner, RoundHandle, RoundMut};
pub use key::RoundKey;
pub use result::ResultSet;
pub use value::RemoteValue;

/// Shared entry point for reads against one target.
///
/// Cheap to share between threads; each thread opens its own cycles.
pub struct ScatterEngine {
    transport: Arc<dyn Transport>,
    gate: AddressGate,
}

impl ScatterEngine {
    pub fn new(transport: Arc<dyn Transport>, gate: AddressGate) -> Self {
        Self { transport, gate }
    }

    pub fn gate(&self) -> &AddressGate {
        &self.gate
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn module_base(&self, module_name: &str) -> Option<u64> {
        self.transport.module_base(module_name)
    }

    /// Open a cycle. Unexecuted rounds are discarded when it goes out of scope.
    pub fn begin_cycle(&self) -> Cycle<'_> {
        Cycle::new(self)
    }

    /// Single typed read outside any cycle
    pub fn read<T: RemoteValue>(&self, address: u64) -> Result<T> {
        if !self.gate.is_valid_aligned(address, T::SIZE) {
            return Err(Error::InvalidAddress { address });
        }
        let bytes = self.transport.read_bytes(address, T::SIZE)?;
        T::from_le_slice(&bytes).ok_or(Error::Transport(TransportError::ShortRead {
            address,
            wanted: T::SIZE,
            got: bytes.len(),
        }))
    }

    /// Read a pointer and return it only if it passes the gate
    pub fn read_ptr(&self, address: u64) -> Option<u64> {
        self.read::<u64>(address)
            .ok()
            .and_then(|ptr| self.gate.check(ptr))
    }

    pub fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        if !self.gate.is_valid_span(address, length) {
            return Err(Error::InvalidAddress { address });
        }
        let bytes = self.transport.read_bytes(address, length)?;
        if bytes.len() < length {
            return Err(Error::Transport(TransportError::ShortRead {
                address,
                wanted: length,
                got: bytes.len(),
            }));
        }
        Ok(bytes)
    }

    /// Read up to `max_len` bytes and decode a NUL-terminated string
    pub fn read_string(
        &self,
        address: u64,
        max_len: usize,
        encoding: StringEncoding,
    ) -> Result<String> {
        let bytes = self.read_bytes(address, max_len)?;
        Ok(decode_c_string(&bytes, encoding))
    }

    /// Follow `offsets` from `base`: each step reads a pointer at `ptr + offset`.
    ///
    /// Every intermediate pointer must pass the gate.
    pub fn read_chain(&self, base: u64, offsets: &[u64]) -> Result<u64> {
        let mut ptr = base;
        for offset in offsets {
            let address = ptr.wrapping_add(*offset);
            ptr = self.read::<u64>(address)?;
            self.gate.assert_valid(ptr)?;
        }
        Ok(ptr)
    }

    pub fn write<T: RemoteValue>(&self, address: u64, value: T) -> Result<()> {
        self.write_bytes(address, &value.to_le_vec())
    }

    pub fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        if !self.gate.is_valid_span(address, data.len()) {
            return Err(Error::InvalidAddress { address });
        }
        self.transport.write_bytes(address, data)?;
        Ok(())
    }
}
