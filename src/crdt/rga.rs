//! Replicated Growable Array (RGA) over characters.
//!
//! The document is a flat sequence of elements, one per character ever
//! inserted. Deleted characters stay in the sequence as tombstones so that
//! concurrent operations can still reference them as neighbors.
//!
//! # Integration rule
//!
//! An insert X names its left and right neighbors at creation time. To place
//! X, start right after `origin_left` and skip every element whose
//! identifier is greater than X's, never passing `origin_right`. X lands at
//! the first element with a smaller identifier.
//!
//! Identifiers are Lamport timestamps, so everything inserted inside a
//! concurrent sibling's subtree carries a larger identifier than that
//! sibling. Skipping "greater" therefore skips whole subtrees, and the final
//! position is a pure function of the operation, not of arrival order.
//! Concurrent inserts into the same gap end up ordered with the higher
//! identifier nearest to `origin_left`.
//!
//! Lookups are linear scans; there is no index by position.

use std::fmt;

use rustc_hash::FxHashSet;

use super::Crdt;
use super::op::OpLog;
use super::op::Operation;
use super::primitives::ElementId;
use super::primitives::IdAllocator;
use super::primitives::ReplicaId;
use super::primitives::VersionVector;
use crate::error::Error;
use crate::error::Result;

/// One character of the document, live or tombstoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Element {
    pub id: ElementId,
    pub value: char,
    pub origin_left: ElementId,
    pub origin_right: ElementId,
    pub deleted: bool,
}

/// What happened to an operation handed to the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The operation was integrated.
    Applied,
    /// The operation had already been applied; nothing changed.
    Duplicate,
    /// A referenced element is not present yet; nothing changed.
    Blocked { missing: ElementId },
}

/// A replica's copy of the document.
#[derive(Clone, Debug)]
pub struct Document {
    /// Elements in document order, tombstones included.
    elements: Vec<Element>,
    /// Identifiers of every element in `elements`.
    present: FxHashSet<ElementId>,
    /// Number of elements not tombstoned.
    visible: usize,
    allocator: IdAllocator,
    version: VersionVector,
    log: OpLog,
}

impl Document {
    /// Create an empty document owned by `replica`.
    pub fn new(replica: ReplicaId) -> Document {
        return Document {
            elements: Vec::new(),
            present: FxHashSet::default(),
            visible: 0,
            allocator: IdAllocator::new(replica),
            version: VersionVector::new(),
            log: OpLog::new(),
        };
    }

    /// Create a document pre-populated with `text`, one synthetic insert
    /// per character.
    pub fn with_content(replica: ReplicaId, text: &str) -> Document {
        let mut doc = Document::new(replica);
        for value in text.chars() {
            doc.append(value);
        }
        return doc;
    }

    /// The replica this document allocates identifiers for.
    pub fn replica(&self) -> ReplicaId {
        return self.allocator.replica();
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        return self.visible;
    }

    /// Check if there is no visible text.
    pub fn is_empty(&self) -> bool {
        return self.visible == 0;
    }

    /// The visible text.
    pub fn materialize(&self) -> String {
        return self.visible_chars().collect();
    }

    /// Iterate over the visible characters.
    pub fn visible_chars(&self) -> impl Iterator<Item = char> + '_ {
        return self.elements.iter().filter(|e| !e.deleted).map(|e| e.value);
    }

    /// All elements in order, tombstones included.
    pub fn elements(&self) -> &[Element] {
        return &self.elements;
    }

    /// The causal frontier of this replica.
    pub fn version(&self) -> &VersionVector {
        return &self.version;
    }

    /// Every operation applied here, in causal order.
    pub fn log(&self) -> &OpLog {
        return &self.log;
    }

    /// Operations a peer at `version` has not seen.
    pub fn ops_since(&self, version: &VersionVector) -> Vec<Operation> {
        return self.log.since(version);
    }

    /// Check if an element (live, tombstoned or sentinel) exists.
    pub fn contains(&self, id: &ElementId) -> bool {
        return id.is_sentinel() || self.present.contains(id);
    }

    /// The identifier of the visible character at `position`.
    pub fn id_at(&self, position: usize) -> Option<ElementId> {
        return self.visible_index(position).map(|i| self.elements[i].id);
    }

    /// The caret position of a cursor resting right after `id`.
    ///
    /// START maps to 0 and END to the visible length. A tombstone maps to
    /// the position after the closest visible character before it.
    pub fn caret_position(&self, id: &ElementId) -> Option<usize> {
        if *id == ElementId::START {
            return Some(0);
        }
        if *id == ElementId::END {
            return Some(self.visible);
        }
        let idx = self.index_of(id)?;
        let caret = self.elements[..=idx].iter().filter(|e| !e.deleted).count();
        return Some(caret);
    }

    /// Insert `value` so that it becomes the visible character at
    /// `position`. Returns the operation to broadcast.
    pub fn apply_local_insert(&mut self, position: usize, value: char) -> Result<Operation> {
        if position > self.visible {
            return Err(Error::NotFound { position, len: self.visible });
        }

        // The left neighbor is the visible character before the caret, the
        // right neighbor whatever element follows it, tombstones included.
        let (origin_left, at) = if position == 0 {
            (ElementId::START, 0)
        } else {
            match self.visible_index(position - 1) {
                Some(i) => (self.elements[i].id, i + 1),
                None => return Err(Error::NotFound { position, len: self.visible }),
            }
        };
        let origin_right = match self.elements.get(at) {
            Some(e) => e.id,
            None => ElementId::END,
        };

        let op = Operation::Insert {
            id: self.allocator.next_id(),
            value,
            origin_left,
            origin_right,
        };
        let outcome = self.apply(op);
        debug_assert_eq!(outcome, Outcome::Applied);
        return Ok(op);
    }

    /// Tombstone the visible character at `position`. Returns the
    /// operation to broadcast.
    pub fn apply_local_delete(&mut self, position: usize) -> Result<Operation> {
        let target = match self.id_at(position) {
            Some(id) => id,
            None => return Err(Error::NotFound { position, len: self.visible }),
        };

        let op = Operation::Delete {
            id: self.allocator.next_id(),
            target,
        };
        let outcome = self.apply(op);
        debug_assert_eq!(outcome, Outcome::Applied);
        return Ok(op);
    }

    /// Apply an operation produced by another replica.
    ///
    /// Malformed operations are rejected. Duplicates and operations whose
    /// dependencies are missing leave the document untouched and say so in
    /// the returned `Outcome`.
    pub fn apply_remote_operation(&mut self, op: Operation) -> Result<Outcome> {
        op.validate()?;
        if self.log.contains(&op.id()) {
            return Ok(Outcome::Duplicate);
        }
        if op.replica() == self.replica() {
            return Err(Error::Malformed {
                id: op.id(),
                reason: "identifier claims this replica but was never allocated here",
            });
        }
        return Ok(self.apply(op));
    }

    /// The first dependency of `op` that is not present, if any.
    pub fn missing_dependency(&self, op: &Operation) -> Option<ElementId> {
        return op.dependencies().into_iter().find(|id| !self.contains(id));
    }

    /// Integrate a validated operation.
    fn apply(&mut self, op: Operation) -> Outcome {
        if self.log.contains(&op.id()) {
            return Outcome::Duplicate;
        }

        match op {
            Operation::Insert { id, value, origin_left, origin_right } => {
                let start = match self.index_after(&origin_left) {
                    Some(i) => i,
                    None => return Outcome::Blocked { missing: origin_left },
                };
                let stop = match self.index_before(&origin_right) {
                    Some(i) => i,
                    None => return Outcome::Blocked { missing: origin_right },
                };

                // Skip concurrent inserts with greater identifiers
                let mut idx = start;
                while idx < stop && self.elements[idx].id > id {
                    idx += 1;
                }

                self.elements.insert(idx, Element {
                    id,
                    value,
                    origin_left,
                    origin_right,
                    deleted: false,
                });
                self.present.insert(id);
                self.visible += 1;
            }
            Operation::Delete { target, .. } => {
                let idx = match self.index_of(&target) {
                    Some(i) => i,
                    None => return Outcome::Blocked { missing: target },
                };
                let element = &mut self.elements[idx];
                if !element.deleted {
                    element.deleted = true;
                    self.visible -= 1;
                }
            }
        }

        self.allocator.observe(op.counter());
        self.version.observe(op.id());
        self.log.push(op);
        return Outcome::Applied;
    }

    /// Append a character at the end of the visible text.
    fn append(&mut self, value: char) {
        let end = self.visible;
        if let Err(err) = self.apply_local_insert(end, value) {
            log::error!("append at end of document failed: {err}");
        }
    }

    /// Index of the element with the given identifier.
    fn index_of(&self, id: &ElementId) -> Option<usize> {
        if !self.present.contains(id) {
            return None;
        }
        return self.elements.iter().position(|e| e.id == *id);
    }

    /// Index of the first slot after a left origin.
    fn index_after(&self, left: &ElementId) -> Option<usize> {
        if *left == ElementId::START {
            return Some(0);
        }
        return self.index_of(left).map(|i| i + 1);
    }

    /// Index of the last slot before a right origin.
    fn index_before(&self, right: &ElementId) -> Option<usize> {
        if *right == ElementId::END {
            return Some(self.elements.len());
        }
        return self.index_of(right);
    }

    /// Index into `elements` of the visible character at `position`.
    fn visible_index(&self, position: usize) -> Option<usize> {
        if position >= self.visible {
            return None;
        }
        return self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.deleted)
            .nth(position)
            .map(|(i, _)| i);
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for value in self.visible_chars() {
            write!(f, "{value}")?;
        }
        return Ok(());
    }
}

impl Crdt for Document {
    /// Replay the other document's log. Its order is causal, so nothing
    /// blocks; duplicates are absorbed.
    fn merge(&mut self, other: &Self) {
        for op in other.log.ops() {
            match self.apply_remote_operation(*op) {
                Ok(Outcome::Blocked { missing }) => {
                    log::warn!("merge skipped {:?}: missing {:?}", op.id(), missing);
                }
                Ok(_) => {}
                Err(err) => log::warn!("merge skipped {:?}: {err}", op.id()),
            }
        }
    }
}
