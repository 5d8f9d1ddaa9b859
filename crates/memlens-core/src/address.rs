//! Address validity checks
//!
//! Pure predicates deciding whether a value read from the target can be
//! dereferenced. Nothing here touches the transport, and a passing check
//! does not guarantee the read will succeed: the target may have freed the
//! page between calls.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest address treated as dereferenceable (first 64KB are never mapped on Windows)
pub const DEFAULT_MIN_ADDRESS: u64 = 0x1_0000;
/// Highest user-mode address on x64
pub const DEFAULT_MAX_ADDRESS: u64 = 0x7FFF_FFFF_FFFF;

/// Plausible address range of the target's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressGate {
    /// Inclusive lower bound
    pub min: u64,
    /// Inclusive upper bound
    pub max: u64,
}

impl Default for AddressGate {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_ADDRESS,
            max: DEFAULT_MAX_ADDRESS,
        }
    }
}

impl AddressGate {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Zero and anything outside `[min, max]` is rejected.
    pub fn is_valid(&self, address: u64) -> bool {
        address != 0 && address >= self.min && address <= self.max
    }

    /// Range check plus natural alignment for a value of `size` bytes.
    ///
    /// Alignment is only enforced for power-of-two sizes up to 8; strings and
    /// odd-sized blobs pass on range alone.
    pub fn is_valid_aligned(&self, address: u64, size: usize) -> bool {
        if !self.is_valid(address) {
            return false;
        }
        match size {
            2 | 4 | 8 => address % size as u64 == 0,
            _ => true,
        }
    }

    /// Range check for the whole span `[address, address + len)`.
    pub fn is_valid_span(&self, address: u64, len: usize) -> bool {
        if !self.is_valid(address) {
            return false;
        }
        match address.checked_add(len.saturating_sub(1) as u64) {
            Some(last) => last <= self.max,
            None => false,
        }
    }

    /// Fail-fast form for entry points that must not proceed with garbage.
    pub fn assert_valid(&self, address: u64) -> Result<()> {
        if self.is_valid(address) {
            Ok(())
        } else {
            Err(Error::InvalidAddress { address })
        }
    }

    /// `Some(address)` when valid, for chaining on freshly read pointers.
    pub fn check(&self, address: u64) -> Option<u64> {
        self.is_valid(address).then_some(address)
    }
}
