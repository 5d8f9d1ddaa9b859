//! Mock transport for tests
//!
//! Sparse regions, mutable module bases, injected failures, and counters for
//! physical transactions so batching behaviour can be asserted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use super::{ScatterRequest, ScatterResults, Transport, TransportError};

const PAGE_SIZE: u64 = 0x1000;

/// Page-granular sparse memory; any write allocates the pages it touches
#[derive(Default)]
struct Pages {
    pages: HashMap<u64, Vec<u8>>,
}

impl Pages {
    fn allocate(&mut self, address: u64, len: usize) {
        let first = address / PAGE_SIZE;
        let last = (address + len.max(1) as u64 - 1) / PAGE_SIZE;
        for page in first..=last {
            self.pages
                .entry(page)
                .or_insert_with(|| vec![0; PAGE_SIZE as usize]);
        }
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_mapped(address, data.len()) {
            return Err(TransportError::Unmapped {
                address,
                length: data.len(),
            });
        }
        for (i, byte) in data.iter().enumerate() {
            let addr = address + i as u64;
            if let Some(page) = self.pages.get_mut(&(addr / PAGE_SIZE)) {
                page[(addr % PAGE_SIZE) as usize] = *byte;
            }
        }
        Ok(())
    }

    fn is_mapped(&self, address: u64, len: usize) -> bool {
        let Some(end) = address.checked_add(len.max(1) as u64 - 1) else {
            return false;
        };
        (address / PAGE_SIZE..=end / PAGE_SIZE).all(|page| self.pages.contains_key(&page))
    }

    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_mapped(address, length) {
            return Err(TransportError::Unmapped { address, length });
        }
        Ok((0..length as u64)
            .map(|i| {
                let addr = address + i;
                self.pages[&(addr / PAGE_SIZE)][(addr % PAGE_SIZE) as usize]
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MockTransport {
    memory: RwLock<Pages>,
    modules: RwLock<HashMap<String, u64>>,
    failing: RwLock<HashSet<u64>>,
    fail_transactions: AtomicBool,
    transactions: AtomicUsize,
    reads: AtomicUsize,
    read_log: Mutex<Vec<(u64, usize)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `data` to `base`, allocating the pages it touches
    pub fn map(&self, base: u64, data: Vec<u8>) {
        let mut memory = self.memory.write().unwrap();
        memory.allocate(base, data.len());
        memory.write(base, &data).unwrap();
    }

    /// Allocate zeroed pages covering `[base, base + len)`
    pub fn map_zeroed(&self, base: u64, len: usize) {
        self.memory.write().unwrap().allocate(base, len);
    }

    pub fn put_u64(&self, address: u64, value: u64) {
        self.map(address, value.to_le_bytes().to_vec());
    }

    pub fn put_u32(&self, address: u64, value: u32) {
        self.map(address, value.to_le_bytes().to_vec());
    }

    /// Write a NUL-terminated string; trailing pages stay mapped for fixed-length name reads
    pub fn put_cstr(&self, address: u64, text: &str) {
        self.map_zeroed(address, text.len() + 256);
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.map(address, bytes);
    }

    /// Remove the pages covering `[base, base + len)`
    pub fn unmap(&self, base: u64, len: usize) {
        let mut memory = self.memory.write().unwrap();
        let first = base / PAGE_SIZE;
        let last = (base + len.max(1) as u64 - 1) / PAGE_SIZE;
        for page in first..=last {
            memory.pages.remove(&page);
        }
    }

    pub fn set_module(&self, name: &str, base: u64) {
        self.modules.write().unwrap().insert(name.to_string(), base);
    }

    /// Reads touching `address` fail until cleared
    pub fn fail_address(&self, address: u64) {
        self.failing.write().unwrap().insert(address);
    }

    pub fn clear_failures(&self) {
        self.failing.write().unwrap().clear();
    }

    /// Make every scatter transaction fail as a whole
    pub fn fail_transactions(&self, fail: bool) {
        self.fail_transactions.store(fail, Ordering::SeqCst);
    }

    /// Physical transactions issued (one per `read_scatter` or `read_bytes` call)
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Individual reads served, batched or not
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of reads whose start address was `address`
    pub fn reads_at(&self, address: u64) -> usize {
        self.read_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(addr, _)| *addr == address)
            .count()
    }

    pub fn reset_counters(&self) {
        self.transactions.store(0, Ordering::SeqCst);
        self.reads.store(0, Ordering::SeqCst);
        self.read_log.lock().unwrap().clear();
    }

    fn read_one(&self, address: u64, length: usize) -> Result<Vec<u8>, TransportError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.read_log.lock().unwrap().push((address, length));

        let end = address.saturating_add(length as u64);
        let failing = self.failing.read().unwrap();
        if failing.iter().any(|&f| f >= address && f < end) {
            return Err(TransportError::Other(format!("injected failure at {:#x}", address)));
        }
        drop(failing);

        self.memory.read().unwrap().read(address, length)
    }
}

impl Transport for MockTransport {
    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, TransportError> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.read_one(address, length)
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<(), TransportError> {
        self.memory.write().unwrap().write(address, data)
    }

    fn module_base(&self, module_name: &str) -> Option<u64> {
        self.modules.read().unwrap().get(module_name).copied()
    }

    fn read_scatter(&self, entries: &[ScatterRequest]) -> Result<ScatterResults, TransportError> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        if self.fail_transactions.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        Ok(entries
            .iter()
            .map(|entry| (entry.key, self.read_one(entry.address, entry.length)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_counts_transactions() {
        let mock = MockTransport::new();
        mock.put_u64(0x1000, 7);
        mock.put_u64(0x2000, 9);

        let results = mock
            .read_scatter(&[
                ScatterRequest { key: 0, address: 0x1000, length: 8 },
                ScatterRequest { key: 1, address: 0x2000, length: 8 },
            ])
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(mock.transaction_count(), 1);
        assert_eq!(mock.read_count(), 2);
        assert_eq!(mock.reads_at(0x2000), 1);
    }

    #[test]
    fn test_mock_pages_join_across_writes() {
        let mock = MockTransport::new();
        mock.put_u64(0x1FF8, 1);
        mock.put_u64(0x2000, 2);

        let bytes = mock.read_bytes(0x1FF8, 16).unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[8], 2);
        assert!(mock.read_bytes(0x5000, 8).is_err());

        mock.unmap(0x2000, 8);
        assert!(mock.read_bytes(0x1FF8, 16).is_err());
    }

    #[test]
    fn test_mock_injected_failure() {
        let mock = MockTransport::new();
        mock.map_zeroed(0x1000, 0x100);
        mock.fail_address(0x1010);

        assert!(mock.read_bytes(0x1000, 8).is_ok());
        assert!(mock.read_bytes(0x1008, 16).is_err());

        mock.clear_failures();
        assert!(mock.read_bytes(0x1008, 16).is_ok());
    }

    #[test]
    fn test_mock_transaction_failure() {
        let mock = MockTransport::new();
        mock.fail_transactions(true);
        let result = mock.read_scatter(&[ScatterRequest { key: 0, address: 0x1000, length: 8 }]);
        assert_eq!(result.unwrap_err(), TransportError::Disconnected);
    }
}
