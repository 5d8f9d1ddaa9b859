//! Transport backed by a captured memory snapshot
//!
//! Snapshot files are JSON:
//!
//! ```text
//! {
//!   "modules": { "GameAssembly.dll": "0x7FF600000000" },
//!   "regions": [ { "base": "0x7FF600001000", "data": "48 8B 05 ..." } ]
//! }
//! ```
//!
//! Addresses are hex strings so 64-bit values survive JSON number handling.
//! Region data is hex, whitespace between bytes optional.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RegionMap, Transport, TransportError};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotRegion {
    pub base: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
    #[serde(default)]
    pub regions: Vec<SnapshotRegion>,
}

impl SnapshotFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Read/write transport over an in-memory copy of a snapshot.
///
/// Writes modify the copy only; the file on disk is untouched.
pub struct SnapshotTransport {
    modules: BTreeMap<String, u64>,
    memory: RwLock<RegionMap>,
}

impl SnapshotTransport {
    pub fn from_file(file: &SnapshotFile) -> Result<Self> {
        let mut modules = BTreeMap::new();
        for (name, base) in &file.modules {
            modules.insert(name.clone(), parse_hex_u64(base)?);
        }

        let mut memory = RegionMap::new();
        for region in &file.regions {
            let base = parse_hex_u64(&region.base)?;
            let data = parse_hex_bytes(&region.data)?;
            debug!("Snapshot region {:#x} ({} bytes)", base, data.len());
            memory.map(base, data);
        }

        Ok(Self {
            modules,
            memory: RwLock::new(memory),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file(&SnapshotFile::load(path)?)
    }

    pub fn region_count(&self) -> usize {
        self.memory.read().map(|m| m.regions().len()).unwrap_or(0)
    }
}

impl Transport for SnapshotTransport {
    fn read_bytes(&self, address: u64, length: usize) -> std::result::Result<Vec<u8>, TransportError> {
        let memory = self
            .memory
            .read()
            .map_err(|_| TransportError::Other("snapshot lock poisoned".to_string()))?;
        memory.read(address, length)
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> std::result::Result<(), TransportError> {
        let mut memory = self
            .memory
            .write()
            .map_err(|_| TransportError::Other("snapshot lock poisoned".to_string()))?;
        memory.write(address, data)
    }

    fn module_base(&self, module_name: &str) -> Option<u64> {
        self.modules
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(module_name))
            .map(|(_, base)| *base)
    }
}

/// Parse a hex address string (with or without 0x prefix).
pub fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.trim();
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::Config(format!("Invalid hex address '{}': {}", s, e)))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.split_whitespace().collect();
    hex::decode(&digits).map_err(|e| Error::Config(format!("Invalid region data: {}", e)))
}
