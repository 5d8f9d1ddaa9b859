use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, trace, warn};

use super::signature::CodeSignature;
use super::snapshot::{ClassEntry, TableHandle, TableSnapshot};
use crate::config::TypeTableConfig;
use crate::error::Error;
use crate::reset::ResetSignal;
use crate::scatter::{RoundKey, ScatterEngine};
use crate::strings::StringEncoding;

const POINTER_SIZE: usize = 8;
const PAGE_SIZE: u64 = 0x1000;
/// Module image bytes per scatter entry during a signature scan
const SCAN_CHUNK: usize = 0x10000;

const KEY_NAME: RoundKey = RoundKey::reserved(0);
const KEY_NAMESPACE: RoundKey = RoundKey::reserved(1);

enum SignatureScan {
    /// Offset of the table pointer from the module base
    Found(u64),
    /// Not found in the image loaded at this base
    Missing { module_base: u64 },
}

#[derive(Default)]
struct LoadState {
    slots_read: usize,
    /// (slot, record address) with a plausible record pointer
    records: Vec<(usize, u64)>,
    /// First slot of the chunk that had to be re-read page by page
    tail_slot: usize,
    named: Vec<NamedRecord>,
    /// Distinct string pointers; a string's key is its position
    strings: Vec<u64>,
}

impl LoadState {
    fn push_slots(&mut self, first_slot: usize, bytes: &[u8], gate_ok: impl Fn(u64) -> bool) {
        for (i, raw) in bytes.chunks_exact(POINTER_SIZE).enumerate() {
            self.slots_read += 1;
            let mut word = [0u8; POINTER_SIZE];
            word.copy_from_slice(raw);
            let record = u64::from_le_bytes(word);
            if gate_ok(record) {
                self.records.push((first_slot + i, record));
            }
        }
    }

    fn intern(&mut self, index: &mut HashMap<u64, usize>, pointer: u64) -> usize {
        *index.entry(pointer).or_insert_with(|| {
            self.strings.push(pointer);
            self.strings.len() - 1
        })
    }
}

struct NamedRecord {
    slot: usize,
    address: u64,
    name: usize,
    namespace: Option<usize>,
}

/// Resolves class names and pre-known slots to class metadata records.
///
/// Owns the type table snapshot. Every public method first re-observes the
/// module base and table pointer and drops the snapshot if either moved or
/// the reset signal fired; name lookups then rebuild it on demand. Rebuilds
/// are serialised, so concurrent lookups after a relocation cause exactly
/// one rebuild.
pub struct TypeResolver {
    engine: Arc<ScatterEngine>,
    config: TypeTableConfig,
    reset: ResetSignal,
    current: RwLock<Option<Arc<TableSnapshot>>>,
    rebuild_lock: Mutex<()>,
    signature_scan: Mutex<Option<SignatureScan>>,
    rebuilds: AtomicUsize,
    generation: AtomicU64,
}

impl TypeResolver {
    pub fn new(engine: Arc<ScatterEngine>, config: TypeTableConfig, reset: ResetSignal) -> Self {
        Self {
            engine,
            config,
            reset,
            current: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            signature_scan: Mutex::new(None),
            rebuilds: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TypeTableConfig {
        &self.config
    }

    /// Snapshots built so far
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds.load(Ordering::Acquire)
    }

    /// Bumped whenever the snapshot is replaced or dropped; addresses derived
    /// from an older generation should be re-resolved.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drop the snapshot and its name memo. The next name lookup rebuilds.
    pub fn invalidate(&self) {
        let dropped = self.write_current().take();
        if dropped.is_some() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            debug!("Type table snapshot invalidated");
        }
    }

    /// Find the table from the module base. Never blocks on the target;
    /// `None` means "try again next cycle".
    pub fn locate_table(&self) -> Option<TableHandle> {
        let module_base = self.engine.module_base(&self.config.module)?;

        if let Some(offset) = self.config.table_offset {
            if let Some(handle) = self.handle_at(module_base, offset) {
                return Some(handle);
            }
            trace!(
                "No type table pointer at {}+{:#x}",
                self.config.module, offset
            );
        }

        let offset = self.signature_offset(module_base)?;
        self.handle_at(module_base, offset)
    }

    /// Re-observe the table, dropping the snapshot if it moved. Never rebuilds.
    pub fn check(&self) -> Option<TableHandle> {
        self.refresh()
    }

    /// Read the table and every record's name, skipping records whose name
    /// pointer fails the address gate.
    pub fn load_snapshot(&self, handle: TableHandle) -> TableSnapshot {
        self.load_snapshot_at(handle, self.reset.epoch())
    }

    /// Current snapshot, rebuilt if the table moved or nothing is loaded
    pub fn snapshot(&self) -> Option<Arc<TableSnapshot>> {
        let handle = self.refresh()?;
        if let Some(snapshot) = self.cached() {
            return Some(snapshot);
        }

        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Another thread may have finished the rebuild while we waited
        if let Some(snapshot) = self.cached()
            && snapshot.handle().matches(&handle)
            && snapshot.epoch() == self.reset.epoch()
        {
            return Some(snapshot);
        }

        let snapshot = self.load_snapshot_at(handle, self.reset.epoch());
        if snapshot.is_empty() {
            debug!(
                "Type table at {:#x} has no named classes yet",
                handle.table_base
            );
            return None;
        }

        let snapshot = Arc::new(snapshot);
        *self.write_current() = Some(Arc::clone(&snapshot));
        let rebuilds = self.rebuilds.fetch_add(1, Ordering::AcqRel) + 1;
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(
            "Loaded type table at {:#x}: {} classes in {} slots (build #{})",
            handle.table_base,
            snapshot.len(),
            snapshot.slots_read(),
            rebuilds
        );
        Some(snapshot)
    }

    /// Class record address for "Namespace.ClassName"
    pub fn find_by_name(&self, full_name: &str) -> Option<u64> {
        let address = self.snapshot()?.find_by_name(full_name);
        if address.is_none() {
            trace!("Class {} not in type table", full_name);
        }
        address
    }

    /// Class record in a known table slot. Slots drift between game builds;
    /// prefer [`find_by_index_checked`](Self::find_by_index_checked).
    pub fn find_by_index(&self, index: usize) -> Option<u64> {
        let handle = self.refresh()?;
        self.read_slot(handle, index)
    }

    /// [`find_by_index`](Self::find_by_index), accepted only if the record's
    /// name still matches
    pub fn find_by_index_checked(&self, index: usize, expected_name: &str) -> Option<u64> {
        let handle = self.refresh()?;
        let address = self.read_slot(handle, index)?;
        let name = self.read_class_name(address)?;
        if name == expected_name {
            Some(address)
        } else {
            debug!(
                "Type slot {} holds {} instead of {}",
                index, name, expected_name
            );
            None
        }
    }

    /// "Namespace.ClassName" of the record at `class_address`
    pub fn class_name(&self, class_address: u64) -> Option<String> {
        self.refresh();
        self.read_class_name(class_address)
    }

    pub fn static_field_base(&self, class_address: u64) -> Option<u64> {
        self.refresh();
        self.read_static_field_base(class_address)
    }

    /// Pointer stored in the static field block at `field_offset`; usually
    /// offset 0 holds the singleton instance.
    pub fn static_singleton(&self, class_address: u64, field_offset: u64) -> Option<u64> {
        self.refresh();
        let base = self.read_static_field_base(class_address)?;
        self.engine.read_ptr(base.checked_add(field_offset)?)
    }

    fn cached(&self) -> Option<Arc<TableSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<TableSnapshot>>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Observe the table location and drop the snapshot if it went stale
    fn refresh(&self) -> Option<TableHandle> {
        let observed = self.locate_table();
        let Some(snapshot) = self.cached() else {
            return observed;
        };

        let reason = match check_handle(&snapshot, observed.as_ref()) {
            Err(e) => e.to_string(),
            Ok(()) if snapshot.epoch() != self.reset.epoch() => {
                format!("Target reset (epoch {})", self.reset.epoch())
            }
            Ok(()) => return observed,
        };

        let mut current = self.write_current();
        // Only the thread that actually drops it logs the transition
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &snapshot)) {
            *current = None;
            self.generation.fetch_add(1, Ordering::AcqRel);
            info!("{}; dropping type table snapshot", reason);
        }
        observed
    }

    fn handle_at(&self, module_base: u64, offset: u64) -> Option<TableHandle> {
        let pointer_address = module_base.checked_add(offset)?;
        let table_base = self.engine.read_ptr(pointer_address)?;
        if !self.engine.gate().is_valid_aligned(table_base, POINTER_SIZE) {
            return None;
        }
        Some(TableHandle {
            module_base,
            pointer_address,
            table_base,
        })
    }

    fn signature_offset(&self, module_base: u64) -> Option<u64> {
        let signature = self.config.signature.as_ref()?;
        let mut scan = self
            .signature_scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match *scan {
            Some(SignatureScan::Found(offset)) => return Some(offset),
            Some(SignatureScan::Missing { module_base: base }) if base == module_base => {
                return None;
            }
            _ => {}
        }

        let found = self.scan_signature(signature, module_base);
        *scan = Some(match found {
            Some(offset) => SignatureScan::Found(offset),
            None => SignatureScan::Missing { module_base },
        });
        found
    }

    /// Scan the module image for the instruction referencing the table pointer
    fn scan_signature(&self, signature: &CodeSignature, module_base: u64) -> Option<u64> {
        let pattern_len = match signature.pattern_bytes() {
            Ok(pattern) => pattern.len(),
            Err(e) => {
                warn!("Type table signature unusable: {}", e);
                return None;
            }
        };
        // Enough overlap that a match at the end of one chunk still carries its displacement
        let overlap = pattern_len.max(signature.instr_offset + signature.disp_offset + 4);
        let scan_length = self.config.scan_length;
        let chunks = scan_length.div_ceil(SCAN_CHUNK);

        let mut cycle = self.engine.begin_cycle();
        let round = cycle.add_round(false);
        {
            let mut entries = cycle.round(round);
            for chunk in 0..chunks {
                let offset = chunk * SCAN_CHUNK;
                let length = (SCAN_CHUNK + overlap).min(scan_length - offset);
                entries.add_bytes(RoundKey::index(chunk), module_base + offset as u64, length);
            }
        }
        let report = cycle.execute();
        let results = report.results(round)?;

        for chunk in 0..chunks {
            let Some(bytes) = results.bytes(RoundKey::index(chunk)) else {
                continue;
            };
            let chunk_base = module_base + (chunk * SCAN_CHUNK) as u64;
            if let Ok(Some(target)) = signature.resolve(bytes, chunk_base) {
                let offset = target.checked_sub(module_base)?;
                info!(
                    "Type table pointer located by signature at {}+{:#x}",
                    self.config.module, offset
                );
                return Some(offset);
            }
        }

        debug!(
            "Type table signature not found in {} ({} of {} chunks readable)",
            self.config.module,
            results.len(),
            chunks
        );
        None
    }

    fn read_slot(&self, handle: TableHandle, index: usize) -> Option<u64> {
        if index >= self.config.max_entries {
            return None;
        }
        let slot = handle
            .table_base
            .checked_add((index * POINTER_SIZE) as u64)?;
        self.engine
            .read_ptr(slot)
            .filter(|record| self.engine.gate().is_valid_aligned(*record, POINTER_SIZE))
    }

    fn read_static_field_base(&self, class_address: u64) -> Option<u64> {
        if !self.engine.gate().is_valid(class_address) {
            return None;
        }
        self.engine
            .read_ptr(class_address.checked_add(self.config.static_fields_offset)?)
    }

    fn read_class_name(&self, class_address: u64) -> Option<String> {
        let gate = *self.engine.gate();
        if !gate.is_valid(class_address) {
            return None;
        }
        let max_len = self.config.max_name_len;

        let mut cycle = self.engine.begin_cycle();
        let pointers = cycle.add_round(false);
        let strings = cycle.add_round(true);
        cycle
            .round(pointers)
            .add_entry::<u64>(KEY_NAME, class_address + self.config.name_offset)
            .add_entry::<u64>(KEY_NAMESPACE, class_address + self.config.namespace_offset)
            .on_complete(move |results, planner| {
                let mut round = planner.round(strings);
                for key in [KEY_NAME, KEY_NAMESPACE] {
                    if let Some(pointer) = results.try_get::<u64>(key).and_then(|p| gate.check(p)) {
                        round.add_bytes(key, pointer, max_len);
                    }
                }
            });

        let report = cycle.execute();
        let results = report.results(strings)?;
        let name = results.string(KEY_NAME, StringEncoding::Utf8)?;
        if name.is_empty() {
            return None;
        }
        let namespace = results
            .string(KEY_NAMESPACE, StringEncoding::Utf8)
            .unwrap_or_default();
        Some(if namespace.is_empty() {
            name
        } else {
            format!("{}.{}", namespace, name)
        })
    }

    fn load_snapshot_at(&self, handle: TableHandle, epoch: u64) -> TableSnapshot {
        let gate = *self.engine.gate();
        let config = &self.config;
        let chunk_entries = config.chunk_entries.max(1);
        let max_entries = config.max_entries;
        let chunk_count = max_entries.div_ceil(chunk_entries);
        let is_record = move |address: u64| gate.is_valid_aligned(address, POINTER_SIZE);

        let cell = RefCell::new(LoadState::default());
        let state = &cell;

        let mut cycle = self.engine.begin_cycle();
        let slots = cycle.add_round(false);
        let tail = cycle.add_round(true);
        let pointers = cycle.add_round(true);
        let strings = cycle.add_round(true);
        let retries = cycle.add_round(true);

        {
            let mut round = cycle.round(slots);
            for chunk in 0..chunk_count {
                let first = chunk * chunk_entries;
                let entries = chunk_entries.min(max_entries - first);
                round.add_bytes(
                    RoundKey::index(chunk),
                    handle.table_base + (first * POINTER_SIZE) as u64,
                    entries * POINTER_SIZE,
                );
            }
            round.on_complete(move |results, planner| {
                let mut state = state.borrow_mut();
                for chunk in 0..chunk_count {
                    let first = chunk * chunk_entries;
                    if let Some(bytes) = results.bytes(RoundKey::index(chunk)) {
                        state.push_slots(first, bytes, is_record);
                        continue;
                    }

                    // The table ends somewhere in this chunk; re-read it page by page
                    let entries = chunk_entries.min(max_entries - first);
                    let start = handle.table_base + (first * POINTER_SIZE) as u64;
                    let end = start + (entries * POINTER_SIZE) as u64;
                    let mut round = planner.round(tail);
                    let mut address = start;
                    let mut piece = 0;
                    while address < end {
                        let next = ((address / PAGE_SIZE + 1) * PAGE_SIZE).min(end);
                        round.add_bytes(RoundKey::index(piece), address, (next - address) as usize);
                        piece += 1;
                        address = next;
                    }
                    state.tail_slot = first;
                    break;
                }
            });
        }

        cycle.round(tail).on_complete(move |results, planner| {
            let mut state = state.borrow_mut();
            let mut slot = state.tail_slot;
            for piece in 0.. {
                let Some(bytes) = results.bytes(RoundKey::index(piece)) else {
                    break;
                };
                state.push_slots(slot, bytes, is_record);
                slot += bytes.len() / POINTER_SIZE;
            }

            let mut round = planner.round(pointers);
            for (i, (_, record)) in state.records.iter().enumerate() {
                round
                    .add_entry::<u64>(RoundKey::index(2 * i), record + config.name_offset)
                    .add_entry::<u64>(RoundKey::index(2 * i + 1), record + config.namespace_offset);
            }
        });

        cycle.round(pointers).on_complete(move |results, planner| {
            let mut state = state.borrow_mut();
            let records = std::mem::take(&mut state.records);
            let mut index = HashMap::new();
            for (i, (slot, address)) in records.into_iter().enumerate() {
                let Some(name) = results
                    .try_get::<u64>(RoundKey::index(2 * i))
                    .and_then(|p| gate.check(p))
                else {
                    trace!(
                        "Type slot {} ({:#x}): no readable name pointer, skipped",
                        slot, address
                    );
                    continue;
                };
                let namespace = results
                    .try_get::<u64>(RoundKey::index(2 * i + 1))
                    .and_then(|p| gate.check(p));

                let name = state.intern(&mut index, name);
                let namespace = namespace.map(|p| state.intern(&mut index, p));
                state.named.push(NamedRecord {
                    slot,
                    address,
                    name,
                    namespace,
                });
            }

            let mut round = planner.round(strings);
            for (key, pointer) in state.strings.iter().enumerate() {
                round.add_bytes(RoundKey::index(key), *pointer, config.max_name_len);
            }
        });

        cycle.round(strings).on_complete(move |results, planner| {
            let state = state.borrow();
            let mut round = planner.round(retries);
            for (key, pointer) in state.strings.iter().enumerate() {
                if results.contains(RoundKey::index(key)) {
                    continue;
                }
                // Strings near the end of a mapped page fail at full length
                let to_page_end = (PAGE_SIZE - pointer % PAGE_SIZE) as usize;
                if to_page_end < config.max_name_len {
                    round.add_bytes(RoundKey::index(key), *pointer, to_page_end);
                }
            }
        });

        let report = cycle.execute();
        let state = cell.into_inner();

        let read_string = |key: usize| {
            [strings, retries].into_iter().find_map(|round| {
                report
                    .results(round)?
                    .string(RoundKey::index(key), StringEncoding::Utf8)
            })
        };

        let mut classes = Vec::with_capacity(state.named.len());
        for record in &state.named {
            let Some(name) = read_string(record.name) else {
                trace!("Type slot {}: name unreadable, skipped", record.slot);
                continue;
            };
            if name.is_empty() || name.chars().any(char::is_control) {
                trace!("Type slot {}: implausible name, skipped", record.slot);
                continue;
            }
            let namespace = record.namespace.and_then(read_string).unwrap_or_default();
            classes.push(ClassEntry {
                index: record.slot,
                address: record.address,
                namespace,
                name,
            });
        }

        debug!(
            "Type table at {:#x}: {} slots read, {} records, {} named ({} transactions)",
            handle.table_base,
            state.slots_read,
            state.named.len(),
            classes.len(),
            report.transactions()
        );
        TableSnapshot::new(handle, epoch, state.slots_read, classes)
    }
}

/// `StaleHandle` if the observed table differs from the one a snapshot was built from
fn check_handle(snapshot: &TableSnapshot, observed: Option<&TableHandle>) -> Result<(), Error> {
    let cached = snapshot.handle();
    let Some(observed) = observed else {
        return Err(Error::NotFound(format!(
            "type table (was at {:#x})",
            cached.table_base
        )));
    };
    if observed.module_base != cached.module_base {
        return Err(Error::StaleHandle {
            cached: cached.module_base,
            observed: observed.module_base,
        });
    }
    if observed.table_base != cached.table_base {
        return Err(Error::StaleHandle {
            cached: cached.table_base,
            observed: observed.table_base,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressGate;
    use crate::transport::MockTransport;
    use std::thread;

    const MODULE: &str = "GameAssembly.dll";

    fn config() -> TypeTableConfig {
        TypeTableConfig {
            table_offset: Some(0x20),
            chunk_entries: 16,
            max_entries: 64,
            ..Default::default()
        }
    }

    fn resolver(mock: &Arc<MockTransport>, config: TypeTableConfig) -> TypeResolver {
        let engine = Arc::new(ScatterEngine::new(
            mock.clone(),
            AddressGate::new(0x100, 0x7FFF_FFFF_FFFF),
        ));
        TypeResolver::new(engine, config, ResetSignal::new())
    }

    /// Class record at `record` named `namespace.name` with static fields at `statics`
    fn put_class(mock: &MockTransport, record: u64, namespace: &str, name: &str, statics: u64) {
        mock.map_zeroed(record, 0x100);
        mock.put_cstr(record + 0x400, name);
        mock.put_u64(record + 0x10, record + 0x400);
        if !namespace.is_empty() {
            mock.put_cstr(record + 0x600, namespace);
            mock.put_u64(record + 0x18, record + 0x600);
        }
        mock.put_u64(record + 0xB8, statics);
    }

    /// Module at 0x1000, table pointer at 0x1020 -> 0x5000, `Foo.Bar` in slot 0
    fn scenario() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        mock.set_module(MODULE, 0x1000);
        mock.put_u64(0x1020, 0x5000);
        mock.put_u64(0x5000, 0xA000);
        put_class(&mock, 0xA000, "Foo", "Bar", 0x9000);
        mock.put_u64(0x9000, 0x7777);
        mock
    }

    #[test]
    fn test_singleton_resolution_round_trip() {
        let mock = scenario();
        let resolver = resolver(&mock, config());

        let class = resolver.find_by_name("Foo.Bar").unwrap();
        assert_eq!(class, 0xA000);
        assert_eq!(resolver.static_field_base(class), Some(0x9000));
        assert_eq!(resolver.static_singleton(class, 0), Some(0x7777));
        assert_eq!(resolver.rebuild_count(), 1);
    }

    #[test]
    fn test_name_without_namespace() {
        let mock = scenario();
        mock.put_u64(0x5008, 0xC000);
        put_class(&mock, 0xC000, "", "Foo.Bar2", 0x9100);
        let resolver = resolver(&mock, config());

        assert_eq!(resolver.find_by_name("Foo.Bar2"), Some(0xC000));
        assert_eq!(resolver.class_name(0xC000).as_deref(), Some("Foo.Bar2"));
    }

    #[test]
    fn test_relocation_triggers_rebuild() {
        let mock = scenario();
        let resolver = resolver(&mock, config());
        assert_eq!(resolver.find_by_name("Foo.Bar"), Some(0xA000));
        let generation = resolver.generation();

        // Scripting runtime reloaded: new module base, new table, new record
        mock.set_module(MODULE, 0x2000);
        mock.put_u64(0x2020, 0x6000);
        mock.put_u64(0x6000, 0xD000);
        put_class(&mock, 0xD000, "Foo", "Bar", 0x9800);

        assert_eq!(resolver.find_by_name("Foo.Bar"), Some(0xD000));
        assert_eq!(resolver.rebuild_count(), 2);
        assert!(resolver.generation() > generation);
        assert_eq!(resolver.snapshot().unwrap().handle().table_base, 0x6000);
    }

    #[test]
    fn test_table_pointer_change_alone_invalidates() {
        let mock = scenario();
        let resolver = resolver(&mock, config());
        resolver.find_by_name("Foo.Bar");

        mock.put_u64(0x1020, 0x6000);
        mock.put_u64(0x6000, 0xA000);

        // Slot lookups drop the snapshot without rebuilding it
        assert_eq!(resolver.find_by_index(0), Some(0xA000));
        assert_eq!(resolver.rebuild_count(), 1);
        assert_eq!(resolver.find_by_name("Foo.Bar"), Some(0xA000));
        assert_eq!(resolver.rebuild_count(), 2);
    }

    #[test]
    fn test_rebuild_idempotence() {
        let mock = scenario();
        let resolver = resolver(&mock, config());
        let first = resolver.find_by_name("Foo.Bar");

        resolver.invalidate();
        let second = resolver.find_by_name("Foo.Bar");
        let third = resolver.find_by_name("Foo.Bar");

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(resolver.rebuild_count(), 2);
    }

    #[test]
    fn test_concurrent_lookups_rebuild_once() {
        let mock = scenario();
        let resolver = Arc::new(resolver(&mock, config()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                thread::spawn(move || resolver.find_by_name("Foo.Bar"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(0xA000));
        }
        assert_eq!(resolver.rebuild_count(), 1);
    }

    #[test]
    fn test_reset_signal_forces_rebuild() {
        let mock = scenario();
        let reset = ResetSignal::new();
        let engine = Arc::new(ScatterEngine::new(
            mock.clone(),
            AddressGate::new(0x100, 0x7FFF_FFFF_FFFF),
        ));
        let resolver = TypeResolver::new(engine, config(), reset.clone());

        resolver.find_by_name("Foo.Bar");
        reset.fire();
        assert_eq!(resolver.find_by_name("Foo.Bar"), Some(0xA000));
        assert_eq!(resolver.rebuild_count(), 2);
    }

    #[test]
    fn test_invalid_name_pointers_skipped() {
        let mock = scenario();
        // Slot 1: name pointer below the gate; slot 2: record pointer itself is garbage
        mock.put_u64(0x5008, 0xB000);
        mock.map_zeroed(0xB000, 0x100);
        mock.put_u64(0xB010, 0x20);
        mock.put_u64(0x5010, 0x13);

        let resolver = resolver(&mock, config());
        let snapshot = resolver.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.classes()[0].full_name(), "Foo.Bar");
        assert_eq!(snapshot.slots_read(), 64);
    }

    #[test]
    fn test_table_end_read_page_by_page() {
        let mock = scenario();
        // 0x5000..0x5C00 and 0x5C00..0x6800: the second chunk crosses into an unmapped page
        mock.put_u64(0x5000 + 0x190 * 8, 0xE000);
        put_class(&mock, 0xE000, "Late", "Entry", 0x9000);
        let resolver = resolver(
            &mock,
            TypeTableConfig {
                chunk_entries: 0x180,
                max_entries: 0x300,
                ..config()
            },
        );

        let snapshot = resolver.snapshot().unwrap();
        assert_eq!(snapshot.find_by_name("Late.Entry"), Some(0xE000));
        assert_eq!(snapshot.find_by_name("Foo.Bar"), Some(0xA000));
        assert_eq!(snapshot.slots_read(), 0x200);
    }

    #[test]
    fn test_find_by_index() {
        let mock = scenario();
        let resolver = resolver(&mock, config());

        assert_eq!(resolver.find_by_index(0), Some(0xA000));
        assert_eq!(resolver.find_by_index(1), None);
        assert_eq!(resolver.find_by_index(64), None);
        assert_eq!(resolver.find_by_index_checked(0, "Foo.Bar"), Some(0xA000));
        assert_eq!(resolver.find_by_index_checked(0, "Foo.Other"), None);
        // Slot lookups never build a snapshot
        assert_eq!(resolver.rebuild_count(), 0);
    }

    #[test]
    fn test_missing_module() {
        let mock = Arc::new(MockTransport::new());
        let resolver = resolver(&mock, config());

        assert!(resolver.locate_table().is_none());
        assert!(resolver.find_by_name("Foo.Bar").is_none());
        assert!(resolver.find_by_index(0).is_none());
    }

    #[test]
    fn test_signature_fallback_scanned_once() {
        let mock = scenario();
        // mov rax, [rip+disp] at 0x1040 pointing back at 0x1020
        let mut code = vec![0x48, 0x8B, 0x05];
        code.extend_from_slice(&(0x1020i32 - 0x1047).to_le_bytes());
        mock.map(0x1040, code);

        let resolver = resolver(
            &mock,
            TypeTableConfig {
                table_offset: Some(0x30),
                signature: Some(CodeSignature::new("48 8B 05 ?? ?? ?? ??", 3, 7)),
                scan_length: 0x100,
                ..config()
            },
        );

        let handle = resolver.locate_table().unwrap();
        assert_eq!(handle.pointer_address, 0x1020);
        assert_eq!(handle.table_base, 0x5000);
        resolver.locate_table().unwrap();
        assert_eq!(mock.reads_at(0x1000), 1);
        assert_eq!(resolver.find_by_name("Foo.Bar"), Some(0xA000));
    }

    #[test]
    fn test_signature_scan_stays_within_module() {
        let mock = scenario();
        mock.set_module(MODULE, 0x10_0000);
        mock.map_zeroed(0x10_0000, 0x11000);
        mock.put_u64(0x10_0020, 0x5000);
        // Match sits in the final partial chunk, which ends exactly at the mapping end
        let mut code = vec![0x48, 0x8B, 0x05];
        code.extend_from_slice(&(0x10_0020i32 - 0x11_0807).to_le_bytes());
        mock.map(0x11_0800, code);

        let resolver = resolver(
            &mock,
            TypeTableConfig {
                table_offset: Some(0x30),
                signature: Some(CodeSignature::new("48 8B 05 ?? ?? ?? ??", 3, 7)),
                scan_length: 0x11000,
                ..config()
            },
        );

        let handle = resolver.locate_table().unwrap();
        assert_eq!(handle.pointer_address, 0x10_0020);
        assert_eq!(handle.table_base, 0x5000);
    }

    #[test]
    fn test_empty_table_not_cached() {
        let mock = scenario();
        mock.put_u64(0x5000, 0);
        let resolver = resolver(&mock, config());

        assert!(resolver.snapshot().is_none());
        mock.put_u64(0x5000, 0xA000);
        assert_eq!(resolver.find_by_name("Foo.Bar"), Some(0xA000));
        assert_eq!(resolver.rebuild_count(), 1);
    }
}
