use dashmap::DashMap;

/// Where the type table was found on one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHandle {
    pub module_base: u64,
    /// Global holding the table pointer
    pub pointer_address: u64,
    /// First slot of the table
    pub table_base: u64,
}

impl TableHandle {
    /// Same module base and same table pointer value
    pub fn matches(&self, other: &TableHandle) -> bool {
        self.module_base == other.module_base && self.table_base == other.table_base
    }
}

/// One class metadata record found in the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    pub index: usize,
    pub address: u64,
    pub namespace: String,
    pub name: String,
}

impl ClassEntry {
    /// "Namespace.Name", or just the name for the global namespace
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    fn is_named(&self, full_name: &str) -> bool {
        if self.namespace.is_empty() {
            return self.name == full_name;
        }
        full_name.len() == self.namespace.len() + 1 + self.name.len()
            && full_name.starts_with(self.namespace.as_str())
            && full_name.as_bytes()[self.namespace.len()] == b'.'
            && full_name.ends_with(self.name.as_str())
    }
}

/// Immutable view of the type table at the time it was loaded.
///
/// Shared between threads behind an `Arc`; the name memo is the only
/// mutable part.
#[derive(Debug)]
pub struct TableSnapshot {
    handle: TableHandle,
    epoch: u64,
    slots_read: usize,
    classes: Vec<ClassEntry>,
    by_name: DashMap<String, u64>,
}

impl TableSnapshot {
    pub(crate) fn new(
        handle: TableHandle,
        epoch: u64,
        slots_read: usize,
        classes: Vec<ClassEntry>,
    ) -> Self {
        Self {
            handle,
            epoch,
            slots_read,
            classes,
            by_name: DashMap::new(),
        }
    }

    pub fn handle(&self) -> TableHandle {
        self.handle
    }

    /// Reset epoch the snapshot was built under
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Table slots read, including empty ones
    pub fn slots_read(&self) -> usize {
        self.slots_read
    }

    /// Named classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[ClassEntry] {
        &self.classes
    }

    /// Class record address for "Namespace.ClassName".
    ///
    /// Hits are memoised for the snapshot's lifetime. Misses are not: slots
    /// the runtime fills in later only show up after a rebuild anyway.
    pub fn find_by_name(&self, full_name: &str) -> Option<u64> {
        if let Some(address) = self.by_name.get(full_name) {
            return Some(*address);
        }
        let entry = self.classes.iter().find(|entry| entry.is_named(full_name))?;
        self.by_name.insert(full_name.to_string(), entry.address);
        Some(entry.address)
    }

    /// Classes whose full name starts with `prefix`
    pub fn find_by_prefix(&self, prefix: &str) -> Vec<&ClassEntry> {
        self.classes
            .iter()
            .filter(|entry| entry.full_name().starts_with(prefix))
            .collect()
    }

    pub fn memoized(&self) -> usize {
        self.by_name.len()
    }
}
