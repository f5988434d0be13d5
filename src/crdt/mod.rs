//! CRDT primitives for collaborative text.

pub mod causal;
pub mod op;
pub mod primitives;
pub mod replica;
pub mod rga;

/// A CRDT is a data type with a merge operator that is commutative,
/// associative, and idempotent.
pub trait Crdt {
    /// Merge another instance into this one.
    fn merge(&mut self, other: &Self);
}
