//! Operations exchanged between replicas, and the log that records them.
//!
//! Each replica produces a sequence of operations that, when replayed in
//! causal order, reconstruct the document. Operations are
//! *intention-preserving*: they reference neighbors by `ElementId`, which
//! survives concurrent edits, rather than by visible position, which shifts.
//!
//! - Insert: "I put this character between ElementId L and ElementId R"
//! - Delete: "I deleted the character ElementId X"

use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;
use smallvec::smallvec;

use super::primitives::ElementId;
use super::primitives::ReplicaId;
use super::primitives::VersionVector;
use crate::error::Error;
use crate::error::Result;

/// An edit operation. Never mutated after creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Insert one character.
    Insert {
        /// Identifier of the new element.
        id: ElementId,
        /// The character.
        value: char,
        /// The element immediately to the left at insertion time.
        origin_left: ElementId,
        /// The element immediately to the right at insertion time.
        origin_right: ElementId,
    },

    /// Tombstone one character.
    Delete {
        /// Stamp allocated for this delete by the originating replica.
        id: ElementId,
        /// The element to tombstone.
        target: ElementId,
    },
}

impl Operation {
    /// The operation's own identifier.
    pub fn id(&self) -> ElementId {
        return match self {
            Operation::Insert { id, .. } => *id,
            Operation::Delete { id, .. } => *id,
        };
    }

    /// The replica that created this operation.
    pub fn replica(&self) -> ReplicaId {
        return self.id().replica;
    }

    /// The creating replica's counter when it made this operation.
    pub fn counter(&self) -> u64 {
        return self.id().counter;
    }

    /// Elements that must exist before this operation can be applied.
    /// Sentinels always exist and are left out.
    pub fn dependencies(&self) -> SmallVec<[ElementId; 2]> {
        let candidates: SmallVec<[ElementId; 2]> = match self {
            Operation::Insert { origin_left, origin_right, .. } => smallvec![*origin_left, *origin_right],
            Operation::Delete { target, .. } => smallvec![*target],
        };
        return candidates.into_iter().filter(|id| !id.is_sentinel()).collect();
    }

    /// Reject operations no allocator could have produced.
    ///
    /// Identifiers must come from a real replica, and every referenced
    /// element must have been observed before the operation was stamped,
    /// so its counter must be strictly smaller.
    pub fn validate(&self) -> Result<()> {
        let id = self.id();
        let malformed = |reason: &'static str| -> Result<()> { Err(Error::Malformed { id, reason }) };

        if !id.is_allocatable() {
            return malformed("identifier outside the allocator's range");
        }

        match self {
            Operation::Insert { origin_left, origin_right, .. } => {
                if *origin_left == ElementId::END {
                    return malformed("left origin is the end sentinel");
                }
                if *origin_right == ElementId::START {
                    return malformed("right origin is the start sentinel");
                }
                if origin_left == origin_right {
                    return malformed("left and right origins are the same element");
                }
                for origin in [origin_left, origin_right] {
                    if origin.is_sentinel() {
                        continue;
                    }
                    if !origin.is_allocatable() {
                        return malformed("origin outside the allocator's range");
                    }
                    if origin.counter >= id.counter {
                        return malformed("origin is not older than the insert");
                    }
                }
            }
            Operation::Delete { target, .. } => {
                if !target.is_allocatable() {
                    return malformed("delete target is not a character");
                }
                if target.counter >= id.counter {
                    return malformed("delete target is not older than the delete");
                }
            }
        }

        return Ok(());
    }
}

/// Every distinct operation a document has applied, in application order.
///
/// Application order respects causality, so replaying the log into an
/// empty document reproduces the same state without buffering.
#[derive(Clone, Debug, Default)]
pub struct OpLog {
    ops: Vec<Operation>,
    seen: FxHashSet<ElementId>,
}

impl OpLog {
    /// Create a new empty operation log.
    pub fn new() -> OpLog {
        return OpLog {
            ops: Vec::new(),
            seen: FxHashSet::default(),
        };
    }

    /// Record an operation. Returns false if it was already recorded.
    pub fn push(&mut self, op: Operation) -> bool {
        if !self.seen.insert(op.id()) {
            return false;
        }
        self.ops.push(op);
        return true;
    }

    /// Check if an operation with this identifier was recorded.
    pub fn contains(&self, id: &ElementId) -> bool {
        return self.seen.contains(id);
    }

    /// All operations, in application order.
    pub fn ops(&self) -> &[Operation] {
        return &self.ops;
    }

    /// Operations whose ids `version` does not cover, in application order.
    pub fn since(&self, version: &VersionVector) -> Vec<Operation> {
        return self
            .ops
            .iter()
            .filter(|op| !version.covers(op.id()))
            .copied()
            .collect();
    }

    pub fn len(&self) -> usize {
        return self.ops.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.ops.is_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(counter: u64, replica: u64) -> ElementId {
        return ElementId::new(counter, ReplicaId(replica));
    }

    fn insert(counter: u64, left: ElementId, right: ElementId) -> Operation {
        return Operation::Insert {
            id: id(counter, 2),
            value: 'x',
            origin_left: left,
            origin_right: right,
        };
    }

    #[test]
    fn dependencies_skip_sentinels() {
        let op = insert(1, ElementId::START, ElementId::END);
        assert!(op.dependencies().is_empty());

        let op = insert(5, id(3, 3), ElementId::END);
        assert_eq!(op.dependencies().as_slice(), &[id(3, 3)]);

        let op = Operation::Delete { id: id(9, 2), target: id(4, 3) };
        assert_eq!(op.dependencies().as_slice(), &[id(4, 3)]);
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(insert(1, ElementId::START, ElementId::END).validate().is_ok());
        assert!(insert(4, id(2, 3), id(3, 2)).validate().is_ok());
        assert!(Operation::Delete { id: id(5, 2), target: id(4, 2) }.validate().is_ok());
    }

    #[test]
    fn validate_rejects_allocator_violations() {
        let root = Operation::Insert {
            id: ElementId::new(3, ReplicaId::ROOT),
            value: 'x',
            origin_left: ElementId::START,
            origin_right: ElementId::END,
        };
        assert!(matches!(root.validate(), Err(Error::Malformed { .. })));

        // Origin newer than the insert itself
        assert!(insert(2, id(7, 3), ElementId::END).validate().is_err());
        // Swapped sentinels
        assert!(insert(2, ElementId::END, ElementId::START).validate().is_err());
        // Deleting a sentinel
        let op = Operation::Delete { id: id(3, 2), target: ElementId::START };
        assert!(op.validate().is_err());
    }

    #[test]
    fn log_deduplicates() {
        let mut log = OpLog::new();
        let op = insert(1, ElementId::START, ElementId::END);
        assert!(log.push(op));
        assert!(!log.push(op));
        assert_eq!(log.len(), 1);
        assert!(log.contains(&op.id()));
    }

    #[test]
    fn log_since_version() {
        let mut log = OpLog::new();
        let a = insert(1, ElementId::START, ElementId::END);
        let b = insert(2, a.id(), ElementId::END);
        log.push(a);
        log.push(b);

        let mut version = VersionVector::new();
        version.observe(a.id());
        assert_eq!(log.since(&version), vec![b]);
        assert_eq!(log.since(&VersionVector::new()), vec![a, b]);

        // A later counter does not hide an earlier one that never arrived
        let mut later = VersionVector::new();
        later.observe(b.id());
        assert_eq!(log.since(&later), vec![a]);
    }
}
