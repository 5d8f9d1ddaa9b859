//! Sparse byte regions keyed by virtual address

use super::TransportError;

/// A contiguous block of captured target memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub data: Vec<u8>,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    pub fn contains(&self, address: u64, length: usize) -> bool {
        address >= self.base
            && address
                .checked_add(length as u64)
                .is_some_and(|end| end <= self.end())
    }
}

/// Non-overlapping regions sorted by base address.
///
/// A read must fall entirely inside one region; reads straddling a gap fail
/// the same way an unmapped page would on a live target.
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    regions: Vec<MemoryRegion>,
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a region, replacing any region it overlaps.
    pub fn map(&mut self, base: u64, data: Vec<u8>) {
        let end = base + data.len() as u64;
        self.regions.retain(|r| r.end() <= base || r.base >= end);
        let pos = self.regions.partition_point(|r| r.base < base);
        self.regions.insert(pos, MemoryRegion { base, data });
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    fn find(&self, address: u64, length: usize) -> Option<usize> {
        let pos = self.regions.partition_point(|r| r.base <= address);
        if pos == 0 {
            return None;
        }
        let idx = pos - 1;
        self.regions[idx].contains(address, length).then_some(idx)
    }

    pub fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, TransportError> {
        let idx = self
            .find(address, length)
            .ok_or(TransportError::Unmapped { address, length })?;
        let region = &self.regions[idx];
        let start = (address - region.base) as usize;
        Ok(region.data[start..start + length].to_vec())
    }

    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), TransportError> {
        let idx = self.find(address, data.len()).ok_or(TransportError::Unmapped {
            address,
            length: data.len(),
        })?;
        let region = &mut self.regions[idx];
        let start = (address - region.base) as usize;
        region.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}
