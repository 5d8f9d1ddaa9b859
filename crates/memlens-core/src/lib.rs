//! # memlens-core
//!
//! Reads the memory of an uncooperative game process through an injected
//! transport and rebuilds a typed view of its runtime.
//!
//! This crate provides:
//! - An address validity gate applied before every dereference
//! - A scatter-read engine batching reads into rounds and cycles
//! - A type table resolver mapping class names to metadata records,
//!   static fields and singleton instances
//! - A walker for the target's active-object list
//! - A cache of resolved singleton addresses that survives runtime reloads

pub mod address;
pub mod cancel;
pub mod config;
pub mod error;
pub mod inspector;
pub mod objects;
pub mod reset;
pub mod retry;
pub mod scatter;
pub mod singleton;
pub mod strings;
pub mod transport;
pub mod types;

pub use address::AddressGate;
pub use cancel::CancelSignal;
pub use config::{
    ComponentLayout, Config, NodeLayout, ObjectListConfig, RetryConfig, SingletonSpec,
    TypeTableConfig,
};
pub use error::{Error, Result};
pub use inspector::Inspector;
pub use objects::{Direction, ObjectGraphWalker, ObjectList, ObjectNode};
pub use reset::ResetSignal;
pub use retry::{ExponentialBackoff, FixedDelay, NoRetry, RetryStrategy, wait_for_target};
pub use scatter::{
    Cycle, CycleReport, Planner, RemoteValue, ResultSet, RoundHandle, RoundKey, RoundMut,
    ScatterEngine,
};
pub use singleton::{ResolutionPath, ResolvedSingleton, SingletonCache};
pub use strings::{StringEncoding, decode_c_string};
pub use transport::{
    ScatterRequest, ScatterResults, SnapshotFile, SnapshotTransport, Transport, TransportError,
};
pub use types::{ClassEntry, CodeSignature, TableHandle, TableSnapshot, TypeResolver};
