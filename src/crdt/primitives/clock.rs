//! Version vectors for tracking the causal frontier of a replica.
//!
//! A version vector records, for each replica, exactly which counters have
//! been observed from it. Counters are Lamport timestamps and operations
//! may arrive out of order, so a replica's seen counters are kept as sorted
//! runs of inclusive ranges instead of a single maximum. Sequential typing
//! collapses into one run; a jump in the Lamport clock or a missing
//! operation splits it.
//!
//! Complexity (r = runs for a replica):
//! - observe: O(log r), plus a shift when a new run opens
//! - covers: O(log r)
//! - merge/compare: O(total runs)

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;

use super::id::ElementId;
use super::id::ReplicaId;

/// Sorted, disjoint, non-adjacent inclusive ranges of counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
struct Runs(Vec<(u64, u64)>);

impl Runs {
    fn max(&self) -> u64 {
        return self.0.last().map(|run| run.1).unwrap_or(0);
    }

    fn contains(&self, counter: u64) -> bool {
        let idx = self.0.partition_point(|run| run.0 <= counter);
        return idx > 0 && counter <= self.0[idx - 1].1;
    }

    /// Check if `start..=end` lies inside a single run.
    fn contains_run(&self, start: u64, end: u64) -> bool {
        let idx = self.0.partition_point(|run| run.0 <= start);
        return idx > 0 && end <= self.0[idx - 1].1;
    }

    fn insert(&mut self, start: u64, end: u64) {
        // Runs strictly left of the new one, not touching it
        let lo = self.0.partition_point(|run| run.1.saturating_add(1) < start);
        // Runs starting at or before the one past its end
        let hi = self.0.partition_point(|run| run.0 <= end.saturating_add(1));
        if lo == hi {
            self.0.insert(lo, (start, end));
            return;
        }
        let merged = (start.min(self.0[lo].0), end.max(self.0[hi - 1].1));
        self.0.splice(lo..hi, std::iter::once(merged));
    }

    fn includes(&self, other: &Runs) -> bool {
        return other.0.iter().all(|&(start, end)| self.contains_run(start, end));
    }
}

/// A version vector over replicas.
///
/// Captures the "happens-before" relationship between replica states.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VersionVector {
    /// Map from replica ID to the counters observed from it.
    entries: FxHashMap<ReplicaId, Runs>,
}

impl VersionVector {
    /// Create an empty version vector.
    pub fn new() -> VersionVector {
        return VersionVector {
            entries: FxHashMap::default(),
        };
    }

    /// Get the highest counter observed from a replica.
    pub fn get(&self, replica: &ReplicaId) -> u64 {
        return self.entries.get(replica).map(Runs::max).unwrap_or(0);
    }

    /// Record an identifier allocated by some replica.
    pub fn observe(&mut self, id: ElementId) {
        if id.replica.is_root() {
            return;
        }
        self.entries.entry(id.replica).or_default().insert(id.counter, id.counter);
    }

    /// Check if this exact identifier has been observed.
    pub fn covers(&self, id: ElementId) -> bool {
        return match self.entries.get(&id.replica) {
            Some(runs) => runs.contains(id.counter),
            None => false,
        };
    }

    /// Merge with another version vector.
    /// The result covers every identifier either side covers.
    pub fn merge(&mut self, other: &VersionVector) {
        for (replica, runs) in &other.entries {
            let entry = self.entries.entry(*replica).or_default();
            for &(start, end) in &runs.0 {
                entry.insert(start, end);
            }
        }
    }

    /// Check if every identifier `other` covers is covered here too.
    pub fn dominates(&self, other: &VersionVector) -> bool {
        return other.entries.iter().all(|(replica, runs)| match self.entries.get(replica) {
            Some(mine) => mine.includes(runs),
            None => runs.0.is_empty(),
        });
    }

    /// Check if this vector causally precedes another.
    /// True when `other` dominates this one and they differ.
    pub fn happens_before(&self, other: &VersionVector) -> bool {
        return other.dominates(self) && self != other;
    }

    /// Check if two vectors are concurrent (neither happens-before the other).
    pub fn concurrent_with(&self, other: &VersionVector) -> bool {
        return !self.dominates(other) && !other.dominates(self);
    }

    /// Replicas with an identifier `other` covers and this vector does not.
    pub fn behind(&self, other: &VersionVector) -> Vec<ReplicaId> {
        let mut replicas: Vec<ReplicaId> = other
            .entries
            .iter()
            .filter(|(replica, runs)| match self.entries.get(*replica) {
                Some(mine) => !mine.includes(runs),
                None => !runs.0.is_empty(),
            })
            .map(|(replica, _)| *replica)
            .collect();
        replicas.sort();
        return replicas;
    }

    /// Iterate over (replica, highest counter) entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (ReplicaId, u64)> + '_ {
        return self.entries.iter().map(|(k, v)| (*k, v.max()));
    }

    /// Number of replicas with an observed identifier.
    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    /// Check if no replica has been observed.
    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }
}

impl PartialEq for VersionVector {
    fn eq(&self, other: &Self) -> bool {
        return self.dominates(other) && other.dominates(self);
    }
}

impl Eq for VersionVector {}
