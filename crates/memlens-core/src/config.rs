//! Target layout configuration.
//!
//! Every field has a default; the defaults describe a 64-bit Unity IL2CPP
//! player. Offsets that change with every game build (the type table and
//! object manager globals) default to unset.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::AddressGate;
use crate::error::{Error, Result};
use crate::retry::ExponentialBackoff;
use crate::types::CodeSignature;

/// Upper bound on type table entries; anything larger is treated as garbage
pub const DEFAULT_MAX_TABLE_ENTRIES: usize = 80_000;

pub const DEFAULT_MAX_SCAN_DEPTH: usize = 50_000;

/// Hard cap on `type_table.max_entries`; two round keys are used per slot
pub const MAX_TABLE_ENTRIES: usize = 1 << 24;

/// Hard cap on `components.max_components`
pub const MAX_COMPONENTS: usize = 4096;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gate: AddressGate,
    pub type_table: TypeTableConfig,
    pub object_list: ObjectListConfig,
    pub retry: RetryConfig,
    /// Well-known singletons keyed by a short name
    pub singletons: BTreeMap<String, SingletonSpec>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could never resolve anything
    pub fn validate(&self) -> Result<()> {
        if self.gate.min >= self.gate.max {
            return Err(Error::Config(format!(
                "address gate range is empty ({:#x}..{:#x})",
                self.gate.min, self.gate.max
            )));
        }
        let table = &self.type_table;
        if table.max_entries == 0 || table.chunk_entries == 0 {
            return Err(Error::Config(
                "type_table.max_entries and chunk_entries must be non-zero".to_string(),
            ));
        }
        if table.max_entries > MAX_TABLE_ENTRIES {
            return Err(Error::Config(format!(
                "type_table.max_entries exceeds {}",
                MAX_TABLE_ENTRIES
            )));
        }
        if table.max_name_len < 2 {
            return Err(Error::Config("type_table.max_name_len is too small".to_string()));
        }
        if let Some(signature) = &table.signature {
            signature.pattern_bytes()?;
        }
        if self.object_list.max_depth == 0 {
            return Err(Error::Config("object_list.max_depth must be non-zero".to_string()));
        }
        self.object_list.components.check()?;
        for (name, spec) in &self.singletons {
            if spec.class_name.is_empty() && spec.object_name.is_none() {
                return Err(Error::Config(format!(
                    "singleton '{}' has neither a class name nor an object name",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeTableConfig {
    /// Module whose image holds the table pointer
    pub module: String,
    /// Offset of the table pointer from the module base
    pub table_offset: Option<u64>,
    /// Scanned once if `table_offset` does not yield a valid pointer
    pub signature: Option<CodeSignature>,
    /// Bytes of the module image covered by the signature scan
    pub scan_length: usize,
    pub name_offset: u64,
    pub namespace_offset: u64,
    pub static_fields_offset: u64,
    pub max_entries: usize,
    /// Table slots read per scatter entry
    pub chunk_entries: usize,
    pub max_name_len: usize,
}

impl Default for TypeTableConfig {
    fn default() -> Self {
        Self {
            module: "GameAssembly.dll".to_string(),
            table_offset: None,
            signature: None,
            scan_length: 0x400_0000,
            name_offset: 0x10,
            namespace_offset: 0x18,
            static_fields_offset: 0xB8,
            max_entries: DEFAULT_MAX_TABLE_ENTRIES,
            chunk_entries: 4096,
            max_name_len: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectListConfig {
    pub module: String,
    /// Offset of the object manager pointer from the module base
    pub manager_offset: Option<u64>,
    /// First node pointer inside the object manager
    pub head_offset: u64,
    /// Last node pointer inside the object manager
    pub tail_offset: u64,
    pub node: NodeLayout,
    /// Pointer chain from an object to its NUL-terminated name
    pub name_chain: Vec<u64>,
    pub max_name_len: usize,
    pub components: ComponentLayout,
    pub max_depth: usize,
}

impl Default for ObjectListConfig {
    fn default() -> Self {
        Self {
            module: "UnityPlayer.dll".to_string(),
            manager_offset: None,
            head_offset: 0x28,
            tail_offset: 0x20,
            node: NodeLayout::default(),
            name_chain: vec![0x60],
            max_name_len: 64,
            components: ComponentLayout::default(),
            max_depth: DEFAULT_MAX_SCAN_DEPTH,
        }
    }
}

/// Field offsets of one linked list node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLayout {
    pub prev: u64,
    pub next: u64,
    pub object: u64,
}

impl NodeLayout {
    /// Bytes covering every field, read as one entry per node
    pub fn span(&self) -> usize {
        (self.prev.max(self.next).max(self.object) + 8) as usize
    }
}

impl Default for NodeLayout {
    fn default() -> Self {
        Self {
            prev: 0x0,
            next: 0x8,
            object: 0x10,
        }
    }
}

/// How to get from an object to the class records of its components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentLayout {
    pub array_offset: u64,
    pub count_offset: u64,
    pub entry_stride: u64,
    /// Component pointer within an array entry
    pub entry_component_offset: u64,
    /// Managed instance pointer within a native component
    pub managed_offset: u64,
    /// Class record pointer within a managed instance
    pub class_offset: u64,
    pub max_components: usize,
}

impl ComponentLayout {
    /// An entry must hold the component pointer, and the component count
    /// must stay small enough to key one read per component.
    pub fn check(&self) -> Result<()> {
        if self.entry_stride < self.entry_component_offset.saturating_add(8) {
            return Err(Error::Config(format!(
                "components.entry_stride {:#x} cannot hold a pointer at {:#x}",
                self.entry_stride, self.entry_component_offset
            )));
        }
        if self.max_components == 0 || self.max_components > MAX_COMPONENTS {
            return Err(Error::Config(format!(
                "components.max_components must be within 1..={}",
                MAX_COMPONENTS
            )));
        }
        Ok(())
    }
}

impl Default for ComponentLayout {
    fn default() -> Self {
        Self {
            array_offset: 0x30,
            count_offset: 0x40,
            entry_stride: 0x10,
            entry_component_offset: 0x8,
            managed_offset: 0x28,
            class_offset: 0x0,
            max_components: 64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingletonSpec {
    /// Fully qualified class name, "Namespace.ClassName"
    pub class_name: String,
    /// Offset of the instance pointer in the static field block
    pub field_offset: u64,
    /// Type table slot known ahead of time; validated by name before use
    pub index_hint: Option<usize>,
    /// Active-object name to scan for when the class lookup fails
    pub object_name: Option<String>,
}

impl SingletonSpec {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    pub fn with_field_offset(mut self, field_offset: u64) -> Self {
        self.field_offset = field_offset;
        self
    }

    pub fn with_index_hint(mut self, index: usize) -> Self {
        self.index_hint = Some(index);
        self
    }

    pub fn with_object_name(mut self, object_name: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: Option<u32>,
}

impl RetryConfig {
    pub fn strategy(&self) -> ExponentialBackoff {
        let backoff = ExponentialBackoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_multiplier(self.multiplier);
        match self.max_attempts {
            Some(max) => backoff.with_max_attempts(max),
            None => backoff,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.type_table.name_offset, 0x10);
        assert_eq!(config.type_table.max_entries, 80_000);
        assert_eq!(config.object_list.node.span(), 0x18);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gate]
min = 0x100

[type_table]
table_offset = 0x20
chunk_entries = 16

[type_table.signature]
pattern = "48 8B 05 ?? ?? ?? ??"
instr_offset = 0
disp_offset = 3
instr_len = 7

[singletons.camera]
class_name = "Game.CameraManager"
index_hint = 42
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.gate.min, 0x100);
        assert_eq!(config.gate.max, AddressGate::default().max);
        assert_eq!(config.type_table.table_offset, Some(0x20));
        assert_eq!(config.type_table.chunk_entries, 16);
        assert_eq!(config.type_table.module, "GameAssembly.dll");
        assert!(config.type_table.signature.is_some());

        let camera = &config.singletons["camera"];
        assert_eq!(camera.class_name, "Game.CameraManager");
        assert_eq!(camera.index_hint, Some(42));
        assert_eq!(camera.field_offset, 0);
    }

    #[test]
    fn test_rejects_empty_gate() {
        let result = Config::from_toml("[gate]\nmin = 0x1000\nmax = 0x1000\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_bad_signature() {
        let toml = r#"
[type_table.signature]
pattern = "48 ZZ"
instr_offset = 0
disp_offset = 2
instr_len = 6
"#;
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_unresolvable_singleton() {
        let toml = "[singletons.empty]\nfield_offset = 8\n";
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_stride() {
        let result = Config::from_toml("[object_list.components]\nentry_stride = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));

        // Stride too short for the component pointer at offset 8
        let result = Config::from_toml("[object_list.components]\nentry_stride = 0xC\n");
        assert!(matches!(result, Err(Error::Config(_))));

        let toml = "[object_list.components]\nentry_stride = 8\nentry_component_offset = 0\n";
        assert!(Config::from_toml(toml).is_ok());
    }

    #[test]
    fn test_rejects_oversized_bounds() {
        let toml = "[object_list.components]\nmax_components = 0xFFFFFFFF\n";
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));

        let toml = "[type_table]\nmax_entries = 0x7FFFFFFF\n";
        assert!(matches!(Config::from_toml(toml), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/nonexistent/memlens.toml").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_retry_strategy() {
        let retry = RetryConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        let strategy = retry.strategy();
        assert_eq!(strategy.initial, Duration::from_millis(500));
        assert_eq!(strategy.max_attempts, Some(3));
    }
}
