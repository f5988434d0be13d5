//! Causal buffer for remote operations.
//!
//! The transport delivers operations at least once and in any order. An
//! operation that references an element this replica has not seen yet is
//! parked here, keyed by the missing identifier. Whenever an operation is
//! applied, everything waiting on its identifier is retried, which may in
//! turn release further operations (cascading release).
//!
//! Nothing waits forever. The buffer refuses new operations past
//! `backlog_ceiling`, and expires operations that have waited through more
//! than `max_wait` applications, together with everything waiting on them.
//! Both cases are reported as `Error::UnresolvableDependency`.

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use super::op::Operation;
use super::primitives::ElementId;
use super::primitives::ReplicaId;
use super::primitives::VersionVector;
use super::rga::Document;
use super::rga::Outcome;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::error::Result;

/// An operation the buffer gave up on, with the reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejected {
    pub op: Operation,
    pub error: Error,
}

/// The result of handing one operation to the buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Operations applied, in application order: the submitted operation
    /// first when it applied directly, then anything it released.
    pub applied: Vec<Operation>,
    /// The submitted operation is waiting on a dependency.
    pub buffered: bool,
    /// The submitted operation had already been applied or buffered.
    pub duplicate: bool,
    /// Buffered operations that expired during this call.
    pub expired: Vec<Rejected>,
}

impl Delivery {
    /// Merge the results of a later call into this one.
    pub fn absorb(&mut self, other: Delivery) {
        self.applied.extend(other.applied);
        self.expired.extend(other.expired);
        self.buffered |= other.buffered;
        self.duplicate |= other.duplicate;
    }
}

/// A parked operation.
#[derive(Clone, Copy, Debug)]
struct Pending {
    op: Operation,
    /// Value of the application counter when the operation was parked.
    since: u64,
}

/// Holds remote operations until their causal dependencies are present.
#[derive(Clone, Debug)]
pub struct CausalBuffer {
    /// Parked operations keyed by the identifier they wait on.
    waiting: FxHashMap<ElementId, Vec<Pending>>,
    /// Identifiers of every parked operation.
    queued: FxHashSet<ElementId>,
    /// Successful applications made through this buffer.
    applications: u64,
    /// Union of the versions senders reported alongside their operations.
    advertised: VersionVector,
    backlog_ceiling: usize,
    max_wait: u64,
}

impl CausalBuffer {
    /// Create an empty buffer with the ceilings from `config`.
    pub fn new(config: &EngineConfig) -> CausalBuffer {
        return CausalBuffer {
            waiting: FxHashMap::default(),
            queued: FxHashSet::default(),
            applications: 0,
            advertised: VersionVector::new(),
            backlog_ceiling: config.backlog_ceiling,
            max_wait: config.max_wait,
        };
    }

    /// Number of parked operations.
    pub fn len(&self) -> usize {
        return self.queued.len();
    }

    /// Check if nothing is parked.
    pub fn is_empty(&self) -> bool {
        return self.queued.is_empty();
    }

    /// Check if an operation with this identifier is parked.
    pub fn contains(&self, id: &ElementId) -> bool {
        return self.queued.contains(id);
    }

    /// Identifiers that parked operations are waiting on, sorted.
    pub fn missing(&self) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self.waiting.keys().copied().collect();
        ids.sort();
        return ids;
    }

    /// Replicas some sender has seen further than `local`.
    /// These are the replicas to ask for catch-up.
    pub fn lagging(&self, local: &VersionVector) -> Vec<ReplicaId> {
        return local.behind(&self.advertised);
    }

    /// Apply `op` to `doc` if its dependencies are present, otherwise park
    /// it. `known` is the sender's version when it sent the operation.
    pub fn submit(
        &mut self,
        doc: &mut Document,
        op: Operation,
        known: Option<&VersionVector>,
    ) -> Result<Delivery> {
        op.validate()?;
        if let Some(version) = known {
            self.advertised.merge(version);
        }

        let mut delivery = Delivery::default();
        if self.queued.contains(&op.id()) {
            delivery.duplicate = true;
            return Ok(delivery);
        }

        match doc.apply_remote_operation(op)? {
            Outcome::Applied => {
                self.applications += 1;
                delivery.applied.push(op);
                self.release(doc, op.id(), &mut delivery);
            }
            Outcome::Duplicate => {
                delivery.duplicate = true;
            }
            Outcome::Blocked { missing } => {
                if self.queued.len() >= self.backlog_ceiling {
                    log::warn!(
                        "causal buffer full ({} operations), rejecting {:?}",
                        self.queued.len(),
                        op.id(),
                    );
                    return Err(Error::UnresolvableDependency { id: op.id(), missing });
                }
                log::trace!("parking {:?} until {:?} arrives", op.id(), missing);
                self.park(Pending { op, since: self.applications }, missing);
                delivery.buffered = true;
            }
        }

        self.expire(&mut delivery);
        return Ok(delivery);
    }

    /// Retry every parked operation, for use after `doc` changed without
    /// going through this buffer.
    pub fn retry(&mut self, doc: &mut Document) -> Delivery {
        let mut delivery = Delivery::default();
        let keys: Vec<ElementId> = self.waiting.keys().copied().filter(|id| doc.contains(id)).collect();
        for key in keys {
            self.release(doc, key, &mut delivery);
        }
        self.expire(&mut delivery);
        return delivery;
    }

    /// Reject everything still parked.
    pub fn drain(&mut self) -> Vec<Rejected> {
        let mut rejected = Vec::new();
        for (missing, waiters) in self.waiting.drain() {
            for pending in waiters {
                rejected.push(Rejected {
                    op: pending.op,
                    error: Error::UnresolvableDependency { id: pending.op.id(), missing },
                });
            }
        }
        self.queued.clear();
        return rejected;
    }

    fn park(&mut self, pending: Pending, missing: ElementId) {
        self.queued.insert(pending.op.id());
        self.waiting.entry(missing).or_default().push(pending);
    }

    /// Retry operations waiting on `ready`, and transitively on whatever
    /// they apply.
    fn release(&mut self, doc: &mut Document, ready: ElementId, delivery: &mut Delivery) {
        let mut stack = vec![ready];
        while let Some(id) = stack.pop() {
            let waiters = match self.waiting.remove(&id) {
                Some(w) => w,
                None => continue,
            };
            for pending in waiters {
                self.queued.remove(&pending.op.id());
                match doc.apply_remote_operation(pending.op) {
                    Ok(Outcome::Applied) => {
                        self.applications += 1;
                        delivery.applied.push(pending.op);
                        stack.push(pending.op.id());
                    }
                    Ok(Outcome::Duplicate) => {}
                    Ok(Outcome::Blocked { missing }) => {
                        // Still waiting, on its other dependency
                        self.park(pending, missing);
                    }
                    Err(error) => delivery.expired.push(Rejected { op: pending.op, error }),
                }
            }
        }
    }

    /// Expire operations that waited through more than `max_wait`
    /// applications, and everything waiting on them.
    fn expire(&mut self, delivery: &mut Delivery) {
        let now = self.applications;
        let max_wait = self.max_wait;
        let mut dead: Vec<ElementId> = Vec::new();

        for (missing, waiters) in self.waiting.iter_mut() {
            waiters.retain(|pending| {
                if now.saturating_sub(pending.since) <= max_wait {
                    return true;
                }
                delivery.expired.push(Rejected {
                    op: pending.op,
                    error: Error::UnresolvableDependency { id: pending.op.id(), missing: *missing },
                });
                dead.push(pending.op.id());
                return false;
            });
        }
        self.waiting.retain(|_, waiters| !waiters.is_empty());

        // Whatever waits on an expired operation can never be applied either
        while let Some(id) = dead.pop() {
            self.queued.remove(&id);
            if let Some(waiters) = self.waiting.remove(&id) {
                for pending in waiters {
                    delivery.expired.push(Rejected {
                        op: pending.op,
                        error: Error::UnresolvableDependency { id: pending.op.id(), missing: id },
                    });
                    dead.push(pending.op.id());
                }
            }
        }

        for rejected in &delivery.expired {
            log::warn!("dropping buffered operation: {}", rejected.error);
        }
    }
}
