//! Runtime type metadata
//!
//! The target runtime keeps a global array of pointers to class metadata
//! records. Each record holds name and namespace string pointers and a
//! pointer to the class's static field block, at fixed offsets.

mod resolver;
mod signature;
mod snapshot;

pub use resolver::TypeResolver;
pub use signature::{CodeSignature, find_pattern, parse_pattern};
pub use snapshot::{ClassEntry, TableHandle, TableSnapshot};
