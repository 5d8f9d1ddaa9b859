//! Active-object list
//!
//! The target keeps every live top-level object in a doubly linked list of
//! `(prev, next, object)` nodes hanging off a global object manager.

mod walker;

pub use walker::{Direction, ObjectGraphWalker};

/// Ends of the active-object list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectList {
    pub head: u64,
    pub tail: u64,
}

/// One node as read during a walk. Only valid for the walk that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectNode {
    pub node: u64,
    pub prev: u64,
    pub next: u64,
    pub object: u64,
}
