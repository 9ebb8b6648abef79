use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::types::{Edge, EdgeId};

/// One id observed twice with different content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EdgeConflict {
    /// Id seen twice.
    pub id: EdgeId,
    /// The first observation, which stays in the map.
    pub kept: Edge,
    /// The later, disagreeing observation.
    pub replayed: Edge,
}

/// Counts for one [`Deduplicator::merge`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Rows whose id was new.
    pub inserted: usize,
    /// Rows whose id was already present.
    pub duplicates: usize,
}

/// Set of edges keyed by id, fed one batch at a time.
///
/// Merging is idempotent: a row already present leaves the map untouched no
/// matter how often or in which batch it is replayed. The first observation
/// of an id wins; a later one that disagrees on category or endpoints is
/// recorded as an [`EdgeConflict`].
#[derive(Clone, Debug, Default)]
pub struct Deduplicator {
    edges: BTreeMap<EdgeId, Edge>,
    duplicates: u64,
    conflicts: Vec<EdgeConflict>,
}

impl Deduplicator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `rows` into the set.
    pub fn merge<I>(&mut self, rows: I) -> MergeOutcome
    where
        I: IntoIterator<Item = Edge>,
    {
        let mut outcome = MergeOutcome::default();
        for edge in rows {
            match self.edges.get(&edge.id) {
                None => {
                    self.edges.insert(edge.id.clone(), edge);
                    outcome.inserted += 1;
                }
                Some(kept) => {
                    outcome.duplicates += 1;
                    if !kept.same_relation(&edge) {
                        warn!(
                            edge_id = %edge.id,
                            kept_category = %kept.category,
                            replayed_category = %edge.category,
                            "scan.dedup.conflict"
                        );
                        self.conflicts.push(EdgeConflict {
                            id: edge.id.clone(),
                            kept: kept.clone(),
                            replayed: edge,
                        });
                    }
                }
            }
        }
        self.duplicates += outcome.duplicates as u64;
        outcome
    }

    /// Distinct ids collected.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Replayed rows dropped so far.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Consumes the accumulator.
    pub fn into_parts(self) -> (BTreeMap<EdgeId, Edge>, u64, Vec<EdgeConflict>) {
        (self.edges, self.duplicates, self.conflicts)
    }
}
