//! Identifier types for CRDT operations and elements.
//!
//! # Identifier Hierarchy
//!
//! - `ReplicaId`: identifies the replica that allocated an identifier
//! - `ElementId`: identifies one character, or one delete operation
//!
//! IDs are:
//! - Globally unique: (counter, replica) pairs are never reused
//! - Totally ordered: by counter first, then by replica
//! - Causal: a replica never allocates a counter at or below one it has seen

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A replica identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub u64);

impl ReplicaId {
    /// Reserved for the document sentinels. Never allocates.
    pub const ROOT: ReplicaId = ReplicaId(0);

    /// The replica owned by a session coordinator.
    pub const HUB: ReplicaId = ReplicaId(1);

    /// Check if this is the reserved sentinel replica.
    pub fn is_root(&self) -> bool {
        return *self == ReplicaId::ROOT;
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "r{}", self.0);
    }
}

/// An element identifier.
///
/// The counter is a Lamport timestamp: every identifier a replica allocates
/// is greater than every identifier that replica had observed before.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId {
    /// Logical timestamp from the allocating replica.
    pub counter: u64,
    /// The replica that allocated this identifier.
    pub replica: ReplicaId,
}

impl ElementId {
    /// The virtual element before the first character.
    pub const START: ElementId = ElementId {
        counter: 0,
        replica: ReplicaId::ROOT,
    };

    /// The virtual element after the last character.
    pub const END: ElementId = ElementId {
        counter: u64::MAX,
        replica: ReplicaId::ROOT,
    };

    /// Create a new element ID.
    pub fn new(counter: u64, replica: ReplicaId) -> ElementId {
        return ElementId { counter, replica };
    }

    /// Check if this is one of the two sentinels.
    pub fn is_sentinel(&self) -> bool {
        return *self == ElementId::START || *self == ElementId::END;
    }

    /// Check if a replica could have allocated this identifier.
    pub fn is_allocatable(&self) -> bool {
        return !self.replica.is_root() && self.counter != 0 && self.counter != u64::MAX;
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ElementId::START {
            return write!(f, "ElementId(START)");
        }
        if *self == ElementId::END {
            return write!(f, "ElementId(END)");
        }
        return write!(f, "ElementId({}, {})", self.counter, self.replica);
    }
}

impl PartialOrd for ElementId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for ElementId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare by counter first, then by replica
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => self.replica.cmp(&other.replica),
            other => other,
        }
    }
}

/// Allocates identifiers for a single replica.
///
/// Only the owning replica may call `next_id`; remote counters are folded
/// in with `observe` so that new identifiers always sort after anything
/// this replica has already seen.
#[derive(Clone, Debug)]
pub struct IdAllocator {
    replica: ReplicaId,
    counter: u64,
}

impl IdAllocator {
    /// Create an allocator for the given replica.
    ///
    /// Panics if `replica` is the reserved sentinel replica.
    pub fn new(replica: ReplicaId) -> IdAllocator {
        assert!(!replica.is_root(), "the root replica cannot allocate identifiers");
        return IdAllocator { replica, counter: 0 };
    }

    /// The replica this allocator belongs to.
    #[inline]
    pub fn replica(&self) -> ReplicaId {
        return self.replica;
    }

    /// The last counter allocated or observed.
    #[inline]
    pub fn counter(&self) -> u64 {
        return self.counter;
    }

    /// Allocate the next identifier.
    #[inline]
    pub fn next_id(&mut self) -> ElementId {
        self.counter += 1;
        return ElementId::new(self.counter, self.replica);
    }

    /// Advance past a counter seen in a remote operation.
    #[inline]
    pub fn observe(&mut self, counter: u64) {
        self.counter = self.counter.max(counter);
    }
}
