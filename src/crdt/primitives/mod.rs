//! Shared primitives for the sequence CRDT.
//!
//! ## IDs
//! - `ReplicaId`: replica identifier
//! - `ElementId`: character identifier (counter, replica)
//! - `IdAllocator`: per-replica Lamport allocator
//!
//! ## Clocks
//! - `VersionVector`: highest counter observed per replica

pub mod clock;
pub mod id;

// Re-exports for convenience
pub use clock::VersionVector;
pub use id::ElementId;
pub use id::IdAllocator;
pub use id::ReplicaId;
