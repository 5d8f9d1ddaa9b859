use std::sync::Arc;

use strum::{Display, IntoStaticStr};
use tracing::{debug, trace};

use super::{ObjectList, ObjectNode};
use crate::cancel::CancelSignal;
use crate::config::ObjectListConfig;
use crate::scatter::{RoundKey, ScatterEngine};
use crate::strings::{StringEncoding, decode_c_string};

const PAGE_SIZE: u64 = 0x1000;

const KEY_HEAD: RoundKey = RoundKey::reserved(0);
const KEY_TAIL: RoundKey = RoundKey::reserved(1);
const KEY_ARRAY: RoundKey = RoundKey::reserved(2);
const KEY_COUNT: RoundKey = RoundKey::reserved(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

/// How a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Found(u64),
    /// Reached the end node without a match
    Exhausted,
    /// Depth limit or an unreadable node
    Stopped,
    Cancelled,
}

/// Walks the target's doubly linked list of active objects.
///
/// Each step costs one read of the node; predicates may read more. Walks are
/// bounded by `max_depth` and end quietly at the first unreadable node.
pub struct ObjectGraphWalker {
    engine: Arc<ScatterEngine>,
    config: ObjectListConfig,
}

impl ObjectGraphWalker {
    pub fn new(engine: Arc<ScatterEngine>, config: ObjectListConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &ObjectListConfig {
        &self.config
    }

    /// Base of the module holding the object manager global
    pub fn module_base(&self) -> Option<u64> {
        self.engine.module_base(&self.config.module)
    }

    /// First and last node from the object manager
    pub fn locate_list(&self) -> Option<ObjectList> {
        let module_base = self.module_base()?;
        let manager_offset = self.config.manager_offset?;
        let manager = self.engine.read_ptr(module_base.checked_add(manager_offset)?)?;

        let mut cycle = self.engine.begin_cycle();
        let round = cycle.add_round(false);
        cycle
            .round(round)
            .add_entry::<u64>(KEY_HEAD, manager + self.config.head_offset)
            .add_entry::<u64>(KEY_TAIL, manager + self.config.tail_offset);
        let report = cycle.execute();
        let results = report.results(round)?;

        let gate = self.engine.gate();
        let head = results.try_get::<u64>(KEY_HEAD).and_then(|p| gate.check(p))?;
        let tail = results.try_get::<u64>(KEY_TAIL).and_then(|p| gate.check(p))?;
        Some(ObjectList { head, tail })
    }

    pub fn scan_forward<P>(
        &self,
        start_node: u64,
        end_node: u64,
        predicate: P,
        max_depth: usize,
        cancel: Option<&CancelSignal>,
    ) -> Option<u64>
    where
        P: FnMut(&ObjectNode) -> bool,
    {
        match self.walk(Direction::Forward, start_node, end_node, predicate, max_depth, cancel) {
            Walk::Found(object) => Some(object),
            _ => None,
        }
    }

    pub fn scan_backward<P>(
        &self,
        start_node: u64,
        end_node: u64,
        predicate: P,
        max_depth: usize,
        cancel: Option<&CancelSignal>,
    ) -> Option<u64>
    where
        P: FnMut(&ObjectNode) -> bool,
    {
        match self.walk(Direction::Backward, start_node, end_node, predicate, max_depth, cancel) {
            Walk::Found(object) => Some(object),
            _ => None,
        }
    }

    /// Scan head to tail, then tail to head if the first pass stopped short.
    pub fn find_object<P>(
        &self,
        mut predicate: P,
        max_depth: usize,
        cancel: Option<&CancelSignal>,
    ) -> Option<u64>
    where
        P: FnMut(&ObjectNode) -> bool,
    {
        let list = self.locate_list()?;
        match self.walk(
            Direction::Forward,
            list.head,
            list.tail,
            &mut predicate,
            max_depth,
            cancel,
        ) {
            Walk::Found(object) => return Some(object),
            // The whole list was seen; going backwards finds nothing new
            Walk::Exhausted | Walk::Cancelled => return None,
            Walk::Stopped => {}
        }
        match self.walk(
            Direction::Backward,
            list.tail,
            list.head,
            &mut predicate,
            max_depth,
            cancel,
        ) {
            Walk::Found(object) => Some(object),
            _ => None,
        }
    }

    pub fn find_object_by_name(
        &self,
        name: &str,
        max_depth: usize,
        cancel: Option<&CancelSignal>,
    ) -> Option<u64> {
        self.find_object(self.name_equals(name), max_depth, cancel)
    }

    /// Name of an object, read through the configured pointer chain
    pub fn object_name(&self, object: u64) -> Option<String> {
        let gate = self.engine.gate();
        let mut pointer = gate.check(object)?;
        for offset in &self.config.name_chain {
            pointer = self.engine.read_ptr(pointer.checked_add(*offset)?)?;
        }

        let max_len = self.config.max_name_len;
        let bytes = match self.engine.read_bytes(pointer, max_len) {
            Ok(bytes) => bytes,
            Err(_) => {
                // Short names can sit right before an unmapped page
                let to_page_end = (PAGE_SIZE - pointer % PAGE_SIZE) as usize;
                if to_page_end >= max_len {
                    return None;
                }
                self.engine.read_bytes(pointer, to_page_end).ok()?
            }
        };
        Some(decode_c_string(&bytes, StringEncoding::Utf8))
    }

    /// Predicate matching objects named exactly `name`
    pub fn name_equals<'s>(&'s self, name: &'s str) -> impl FnMut(&ObjectNode) -> bool + 's {
        move |node: &ObjectNode| self.object_name(node.object).is_some_and(|n| n == name)
    }

    /// Predicate matching objects with a component whose class record is
    /// `class_address`
    pub fn has_component(&self, class_address: u64) -> impl FnMut(&ObjectNode) -> bool + '_ {
        move |node: &ObjectNode| self.component_classes(node.object).contains(&class_address)
    }

    /// Class record of every component attached to `object`
    pub fn component_classes(&self, object: u64) -> Vec<u64> {
        let gate = *self.engine.gate();
        let layout = self.config.components;
        if !gate.is_valid(object) {
            return Vec::new();
        }
        if let Err(e) = layout.check() {
            debug!("Component lookup skipped: {}", e);
            return Vec::new();
        }

        let mut cycle = self.engine.begin_cycle();
        let header = cycle.add_round(false);
        let entries = cycle.add_round(true);
        let natives = cycle.add_round(true);
        let classes = cycle.add_round(true);

        cycle
            .round(header)
            .add_entry::<u64>(KEY_ARRAY, object + layout.array_offset)
            .add_entry::<u32>(KEY_COUNT, object + layout.count_offset)
            .on_complete(move |results, planner| {
                let array = results.try_get::<u64>(KEY_ARRAY).and_then(|p| gate.check(p));
                let count = results.try_get::<u32>(KEY_COUNT).unwrap_or(0) as usize;
                let Some(array) = array else { return };
                if count == 0 || count > layout.max_components {
                    trace!("Object {:#x}: implausible component count {}", object, count);
                    return;
                }
                planner.round(entries).add_bytes(
                    KEY_ARRAY,
                    array,
                    count * layout.entry_stride as usize,
                );
            });

        cycle.round(entries).on_complete(move |results, planner| {
            let Some(bytes) = results.bytes(KEY_ARRAY) else {
                return;
            };
            let mut round = planner.round(natives);
            for (i, entry) in bytes.chunks_exact(layout.entry_stride as usize).enumerate() {
                let at = layout.entry_component_offset as usize;
                let Some(raw) = entry.get(at..at + 8) else {
                    continue;
                };
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                if let Some(component) = gate.check(u64::from_le_bytes(word)) {
                    round.add_entry::<u64>(RoundKey::index(i), component + layout.managed_offset);
                }
            }
        });

        cycle.round(natives).on_complete(move |results, planner| {
            let mut round = planner.round(classes);
            for i in 0..layout.max_components {
                let key = RoundKey::index(i);
                if let Some(managed) = results.try_get::<u64>(key).and_then(|p| gate.check(p)) {
                    round.add_entry::<u64>(key, managed + layout.class_offset);
                }
            }
        });

        let report = cycle.execute();
        let Some(results) = report.results(classes) else {
            return Vec::new();
        };
        (0..layout.max_components)
            .filter_map(|i| results.try_get::<u64>(RoundKey::index(i)))
            .filter(|class| gate.is_valid(*class))
            .collect()
    }

    fn walk<P>(
        &self,
        direction: Direction,
        start_node: u64,
        end_node: u64,
        mut predicate: P,
        max_depth: usize,
        cancel: Option<&CancelSignal>,
    ) -> Walk
    where
        P: FnMut(&ObjectNode) -> bool,
    {
        let mut node = start_node;
        for depth in 0..max_depth {
            if cancel.is_some_and(CancelSignal::is_cancelled) {
                debug!("Object scan ({}) cancelled after {} nodes", direction, depth);
                return Walk::Cancelled;
            }

            let Some(current) = self.read_node(node) else {
                debug!(
                    "Object scan ({}) ended at unreadable node {:#x} after {} nodes",
                    direction, node, depth
                );
                return Walk::Stopped;
            };

            if self.engine.gate().is_valid(current.object) && predicate(&current) {
                trace!(
                    "Object scan ({}) matched {:#x} at depth {}",
                    direction, current.object, depth
                );
                return Walk::Found(current.object);
            }
            if node == end_node {
                return Walk::Exhausted;
            }

            node = match direction {
                Direction::Forward => current.next,
                Direction::Backward => current.prev,
            };
        }

        debug!(
            "Object scan ({}) gave up after {} nodes without reaching {:#x}",
            direction, max_depth, end_node
        );
        Walk::Stopped
    }

    /// One read covering prev, next and object; `None` for an invalid node
    fn read_node(&self, node: u64) -> Option<ObjectNode> {
        let layout = self.config.node;
        if !self.engine.gate().is_valid_aligned(node, 8) {
            return None;
        }
        let bytes = self.engine.read_bytes(node, layout.span()).ok()?;
        let field = |offset: u64| {
            let start = offset as usize;
            let mut word = [0u8; 8];
            word.copy_from_slice(bytes.get(start..start + 8)?);
            Some(u64::from_le_bytes(word))
        };
        Some(ObjectNode {
            node,
            prev: field(layout.prev)?,
            next: field(layout.next)?,
            object: field(layout.object)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressGate;
    use crate::transport::MockTransport;

    const MODULE: &str = "UnityPlayer.dll";
    const NODES: u64 = 0x20000;
    const OBJECTS: u64 = 0x40000;
    const NAMES: u64 = 0x60000;

    fn node_at(i: u64) -> u64 {
        NODES + i * 0x100
    }

    fn object_at(i: u64) -> u64 {
        OBJECTS + i * 0x100
    }

    /// Linear list of `names.len()` nodes hanging off a manager at 0x3000
    fn build_list(names: &[&str]) -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        let count = names.len() as u64;
        mock.set_module(MODULE, 0x1000);
        mock.put_u64(0x1010, 0x3000);
        mock.put_u64(0x3000 + 0x28, node_at(0));
        mock.put_u64(0x3000 + 0x20, node_at(count - 1));

        for (i, name) in names.iter().enumerate() {
            let i = i as u64;
            let prev = if i == 0 { 0 } else { node_at(i - 1) };
            let next = if i + 1 == count { 0 } else { node_at(i + 1) };
            mock.put_u64(node_at(i), prev);
            mock.put_u64(node_at(i) + 0x8, next);
            mock.put_u64(node_at(i) + 0x10, object_at(i));
            mock.put_u64(object_at(i) + 0x60, NAMES + i * 0x100);
            mock.put_cstr(NAMES + i * 0x100, name);
        }
        mock
    }

    fn walker(mock: &Arc<MockTransport>) -> ObjectGraphWalker {
        let engine = Arc::new(ScatterEngine::new(
            mock.clone(),
            AddressGate::new(0x100, 0x7FFF_FFFF_FFFF),
        ));
        ObjectGraphWalker::new(
            engine,
            ObjectListConfig {
                manager_offset: Some(0x10),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_locate_list() {
        let mock = build_list(&["a", "b", "c"]);
        let list = walker(&mock).locate_list().unwrap();
        assert_eq!(list.head, node_at(0));
        assert_eq!(list.tail, node_at(2));
    }

    #[test]
    fn test_find_by_name_forward() {
        let mock = build_list(&["Main Camera", "Player", "GameWorld"]);
        let walker = walker(&mock);

        assert_eq!(walker.object_name(object_at(1)).as_deref(), Some("Player"));
        assert_eq!(
            walker.find_object_by_name("GameWorld", 100, None),
            Some(object_at(2))
        );
        assert_eq!(walker.find_object_by_name("Missing", 100, None), None);
    }

    #[test]
    fn test_missing_object_not_rescanned_backwards() {
        let mock = build_list(&["a", "b", "c"]);
        let walker = walker(&mock);

        walker.find_object_by_name("Missing", 100, None);
        // Forward pass reached the tail, so each node was read exactly once
        assert_eq!(mock.reads_at(node_at(1)), 1);
    }

    #[test]
    fn test_bounded_scan_on_cyclic_list() {
        let mock = build_list(&["a", "b", "c"]);
        // c -> a: the list never reaches an end node
        mock.put_u64(node_at(2) + 0x8, node_at(0));
        let walker = walker(&mock);
        mock.reset_counters();

        let found = walker.scan_forward(node_at(0), 0xDEAD_0000, |_| false, 10, None);
        assert_eq!(found, None);
        assert_eq!(mock.read_count(), 10);
    }

    #[test]
    fn test_invalid_node_ends_scan() {
        let mock = build_list(&["a", "b", "c", "target"]);
        mock.put_u64(node_at(1) + 0x8, 0x8);
        let walker = walker(&mock);
        mock.reset_counters();

        let found = walker.scan_forward(node_at(0), node_at(3), walker.name_equals("target"), 100, None);
        assert_eq!(found, None);
        assert_eq!(mock.reads_at(0x8), 0);
    }

    #[test]
    fn test_backward_fallback_after_broken_link() {
        let mock = build_list(&["a", "b", "c", "target"]);
        mock.put_u64(node_at(1) + 0x8, 0x8);
        let walker = walker(&mock);

        assert_eq!(
            walker.find_object_by_name("target", 100, None),
            Some(object_at(3))
        );
    }

    #[test]
    fn test_scan_backward() {
        let mock = build_list(&["a", "b", "c"]);
        let walker = walker(&mock);

        let mut visited = Vec::new();
        let found = walker.scan_backward(
            node_at(2),
            node_at(0),
            |node| {
                visited.push(node.node);
                false
            },
            100,
            None,
        );
        assert_eq!(found, None);
        assert_eq!(visited, vec![node_at(2), node_at(1), node_at(0)]);
    }

    #[test]
    fn test_cancelled_scan() {
        let mock = build_list(&["a", "b", "c"]);
        let walker = walker(&mock);
        let cancel = CancelSignal::new();
        cancel.trigger();
        mock.reset_counters();

        assert_eq!(walker.find_object_by_name("c", 100, Some(&cancel)), None);
        // Only the list head and tail lookups
        assert_eq!(mock.reads_at(node_at(0)), 0);
    }

    #[test]
    fn test_has_component() {
        let mock = build_list(&["a", "Player"]);
        let object = object_at(1);
        // Two components; the second one's managed instance is of class 0xC0000
        mock.put_u64(object + 0x30, 0x70000);
        mock.put_u32(object + 0x40, 2);
        mock.put_u64(0x70000 + 0x8, 0x71000);
        mock.put_u64(0x70000 + 0x18, 0x72000);
        mock.put_u64(0x71000 + 0x28, 0x73000);
        mock.put_u64(0x72000 + 0x28, 0x74000);
        mock.put_u64(0x73000, 0xB0000);
        mock.put_u64(0x74000, 0xC0000);
        let walker = walker(&mock);

        assert_eq!(walker.component_classes(object), vec![0xB0000, 0xC0000]);
        assert_eq!(walker.find_object(walker.has_component(0xC0000), 100, None), Some(object));
        assert_eq!(walker.find_object(walker.has_component(0xD0000), 100, None), None);
    }

    #[test]
    fn test_unusable_component_layout_reads_nothing() {
        let mock = build_list(&["Player"]);
        let object = object_at(0);
        mock.put_u64(object + 0x30, 0x70000);
        mock.put_u32(object + 0x40, 2);
        mock.put_u64(0x70000 + 0x8, 0x71000);
        let engine = Arc::new(ScatterEngine::new(
            mock.clone(),
            AddressGate::new(0x100, 0x7FFF_FFFF_FFFF),
        ));
        let mut config = ObjectListConfig {
            manager_offset: Some(0x10),
            ..Default::default()
        };
        config.components.entry_stride = 0;
        let walker = ObjectGraphWalker::new(engine, config);
        mock.reset_counters();

        assert!(walker.component_classes(object).is_empty());
        assert_eq!(walker.find_object(walker.has_component(0xC0000), 100, None), None);
        assert_eq!(mock.reads_at(object + 0x30), 0);
    }
}
