//! A document together with the causal buffer that feeds it.
//!
//! This is the unit each participant (and the session hub) holds: local
//! edits go straight into the document, remote operations go through the
//! buffer so they can arrive in any order.

use super::Crdt;
use super::causal::CausalBuffer;
use super::causal::Delivery;
use super::causal::Rejected;
use super::op::Operation;
use super::primitives::ElementId;
use super::primitives::ReplicaId;
use super::primitives::VersionVector;
use super::rga::Document;
use crate::config::EngineConfig;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct Replica {
    document: Document,
    buffer: CausalBuffer,
}

impl Replica {
    /// Create an empty replica.
    pub fn new(replica: ReplicaId, config: &EngineConfig) -> Replica {
        return Replica {
            document: Document::new(replica),
            buffer: CausalBuffer::new(config),
        };
    }

    /// Create a replica whose document starts out holding `text`, typed
    /// left to right by this replica.
    pub fn with_content(replica: ReplicaId, text: &str, config: &EngineConfig) -> Replica {
        return Replica {
            document: Document::with_content(replica, text),
            buffer: CausalBuffer::new(config),
        };
    }

    /// Build a replica by replaying another replica's history.
    ///
    /// The history may be in any order; operations that never become
    /// applicable are an error.
    pub fn from_history(replica: ReplicaId, history: &[Operation], config: &EngineConfig) -> Result<Replica> {
        let mut result = Replica::new(replica, config);
        for op in history {
            let delivery = result.apply_remote_operation(*op, None)?;
            if let Some(rejected) = delivery.expired.into_iter().next() {
                return Err(rejected.error);
            }
        }
        if let Some(rejected) = result.buffer.drain().into_iter().next() {
            return Err(rejected.error);
        }
        return Ok(result);
    }

    pub fn replica(&self) -> ReplicaId {
        return self.document.replica();
    }

    pub fn document(&self) -> &Document {
        return &self.document;
    }

    pub fn buffer(&self) -> &CausalBuffer {
        return &self.buffer;
    }

    /// Insert `value` so it ends up at visible `position`.
    pub fn apply_local_insert(&mut self, position: usize, value: char) -> Result<Operation> {
        return self.document.apply_local_insert(position, value);
    }

    /// Delete the character at visible `position`.
    pub fn apply_local_delete(&mut self, position: usize) -> Result<Operation> {
        return self.document.apply_local_delete(position);
    }

    /// Apply an operation from another replica, or buffer it until its
    /// dependencies have arrived.
    pub fn apply_remote_operation(&mut self, op: Operation, known: Option<&VersionVector>) -> Result<Delivery> {
        return self.buffer.submit(&mut self.document, op, known);
    }

    pub fn materialize(&self) -> String {
        return self.document.materialize();
    }

    pub fn len(&self) -> usize {
        return self.document.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.document.is_empty();
    }

    pub fn version(&self) -> &VersionVector {
        return self.document.version();
    }

    /// Check if an element exists here, tombstoned or not.
    pub fn contains(&self, id: &ElementId) -> bool {
        return self.document.contains(id);
    }

    /// Applied operations the holder of `version` has not seen.
    pub fn ops_since(&self, version: &VersionVector) -> Vec<Operation> {
        return self.document.ops_since(version);
    }

    /// Number of remote operations waiting on dependencies.
    pub fn pending_len(&self) -> usize {
        return self.buffer.len();
    }

    /// Replicas some sender has seen further than this replica.
    pub fn lagging(&self) -> Vec<ReplicaId> {
        return self.buffer.lagging(self.document.version());
    }

    /// Give up on every buffered operation.
    pub fn discard_pending(&mut self) -> Vec<Rejected> {
        return self.buffer.drain();
    }
}

impl Crdt for Replica {
    fn merge(&mut self, other: &Self) {
        self.document.merge(&other.document);
        let released = self.buffer.retry(&mut self.document);
        if !released.applied.is_empty() {
            log::debug!("merge released {} buffered operations", released.applied.len());
        }
    }
}
