//! Memoised addresses of well-known singletons

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::config::SingletonSpec;
use crate::error::{Error, Result};
use crate::objects::ObjectGraphWalker;
use crate::reset::ResetSignal;
use crate::retry::{RetryStrategy, wait_for_target};
use crate::types::{TableHandle, TypeResolver};

/// Which lookup produced an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResolutionPath {
    /// Pre-known type table slot, validated by name
    Index,
    /// Type table name lookup
    Name,
    /// Active-object list scan by object name
    ObjectScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedSingleton {
    pub address: u64,
    /// `None` when found through the object list
    pub class_address: Option<u64>,
    pub path: ResolutionPath,
}

/// A resolved address and what the target looked like when it was found
struct CachedEntry {
    resolved: ResolvedSingleton,
    table: Option<TableHandle>,
    /// Object list module base, for object scan results only
    list_module: Option<u64>,
    epoch: u64,
}

impl CachedEntry {
    fn is_current(
        &self,
        table: Option<&TableHandle>,
        list_module: Option<u64>,
        epoch: u64,
    ) -> bool {
        let same_table = match (self.table.as_ref(), table) {
            (Some(cached), Some(observed)) => cached.matches(observed),
            (None, None) => true,
            _ => false,
        };
        let same_list =
            self.resolved.path != ResolutionPath::ObjectScan || self.list_module == list_module;
        self.epoch == epoch && same_table && same_list
    }
}

struct Slot {
    spec: SingletonSpec,
    cached: Mutex<Option<CachedEntry>>,
}

/// Resolves and memoises singleton addresses.
///
/// Each singleton has its own lock, so a slow miss on one never blocks
/// another. A cached address is dropped when the reset epoch moves or the
/// type table it came from is no longer where it was; object scan results
/// also follow the object list module.
pub struct SingletonCache {
    types: Arc<TypeResolver>,
    objects: Arc<ObjectGraphWalker>,
    reset: ResetSignal,
    slots: BTreeMap<String, Slot>,
}

impl SingletonCache {
    pub fn new(
        types: Arc<TypeResolver>,
        objects: Arc<ObjectGraphWalker>,
        reset: ResetSignal,
    ) -> Self {
        Self {
            types,
            objects,
            reset,
            slots: BTreeMap::new(),
        }
    }

    pub fn with_specs(mut self, specs: impl IntoIterator<Item = (String, SingletonSpec)>) -> Self {
        for (name, spec) in specs {
            self.register(name, spec);
        }
        self
    }

    /// Add or replace a singleton; any cached address for `name` is dropped
    pub fn register(&mut self, name: impl Into<String>, spec: SingletonSpec) {
        self.slots.insert(
            name.into(),
            Slot {
                spec,
                cached: Mutex::new(None),
            },
        );
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn spec(&self, name: &str) -> Option<&SingletonSpec> {
        self.slots.get(name).map(|slot| &slot.spec)
    }

    pub fn resolve(&self, name: &str) -> Option<ResolvedSingleton> {
        self.resolve_with(name, None)
    }

    /// Cached address if still current, otherwise resolve. `cancel` is
    /// checked during object list scans.
    pub fn resolve_with(&self, name: &str, cancel: Option<&CancelSignal>) -> Option<ResolvedSingleton> {
        let Some(slot) = self.slots.get(name) else {
            debug!("Unknown singleton {}", name);
            return None;
        };

        let table = self.types.check();
        let epoch = self.reset.epoch();

        let mut cached = slot.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = cached.as_ref() {
            let list_module = match entry.resolved.path {
                ResolutionPath::ObjectScan => self.objects.module_base(),
                _ => None,
            };
            if entry.is_current(table.as_ref(), list_module, epoch) {
                return Some(entry.resolved);
            }
            debug!("Singleton {}: cached address {:#x} dropped", name, entry.resolved.address);
            *cached = None;
        }

        let resolved = self.resolve_spec(name, &slot.spec, cancel)?;
        info!(
            "Resolved singleton {} at {:#x} via {}",
            name, resolved.address, resolved.path
        );
        let list_module = match resolved.path {
            ResolutionPath::ObjectScan => self.objects.module_base(),
            _ => None,
        };
        *cached = Some(CachedEntry {
            resolved,
            table,
            list_module,
            epoch,
        });
        Some(resolved)
    }

    /// Keep resolving until the target has loaded far enough, reporting
    /// "waiting for target" in between.
    pub fn wait_for(
        &self,
        name: &str,
        strategy: &dyn RetryStrategy,
        cancel: &CancelSignal,
    ) -> Result<ResolvedSingleton> {
        if !self.slots.contains_key(name) {
            return Err(Error::Config(format!("unknown singleton '{}'", name)));
        }
        wait_for_target(strategy, cancel, name, || self.resolve_with(name, Some(cancel)))
    }

    /// Cached address without resolving
    pub fn cached(&self, name: &str) -> Option<ResolvedSingleton> {
        let slot = self.slots.get(name)?;
        let cached = slot.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached.as_ref().map(|entry| entry.resolved)
    }

    /// Drop one cached address, e.g. after reads through it started failing
    pub fn invalidate(&self, name: &str) {
        if let Some(slot) = self.slots.get(name) {
            *slot.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    pub fn clear(&self) {
        for slot in self.slots.values() {
            *slot.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    fn resolve_spec(
        &self,
        name: &str,
        spec: &SingletonSpec,
        cancel: Option<&CancelSignal>,
    ) -> Option<ResolvedSingleton> {
        if !spec.class_name.is_empty() {
            if let Some(index) = spec.index_hint {
                let class = self.types.find_by_index_checked(index, &spec.class_name);
                if let Some(resolved) = self.from_class(class, spec, ResolutionPath::Index) {
                    return Some(resolved);
                }
                debug!(
                    "Singleton {}: slot {} unusable, falling back to name lookup",
                    name, index
                );
            }

            let class = self.types.find_by_name(&spec.class_name);
            if let Some(resolved) = self.from_class(class, spec, ResolutionPath::Name) {
                return Some(resolved);
            }
        }

        let object_name = spec.object_name.as_deref()?;
        debug!("Singleton {}: scanning object list for {}", name, object_name);
        let max_depth = self.objects.config().max_depth;
        let address = self
            .objects
            .find_object_by_name(object_name, max_depth, cancel)?;
        Some(ResolvedSingleton {
            address,
            class_address: None,
            path: ResolutionPath::ObjectScan,
        })
    }

    fn from_class(
        &self,
        class: Option<u64>,
        spec: &SingletonSpec,
        path: ResolutionPath,
    ) -> Option<ResolvedSingleton> {
        let class = class?;
        let address = self.types.static_singleton(class, spec.field_offset)?;
        Some(ResolvedSingleton {
            address,
            class_address: Some(class),
            path,
        })
    }
}
