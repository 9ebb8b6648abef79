use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::scan::ScanResult;
use crate::types::{Category, CategoryFilter, EdgeId, NodeId};

/// Default cap on violations kept in a [`Reconciliation`].
pub const DEFAULT_MAX_VIOLATIONS: usize = 1_000;

/// What a violation is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A `passedprops` or `failedprops` edge points at a document no
    /// `closedprops` edge points at.
    MissingClosedEdge,
    /// One id was observed with two different categories or endpoints.
    CategoryConflict,
}

/// One breach of the category invariants. Collected, never fixed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    /// What was violated.
    pub kind: ViolationKind,
    /// Offending edge.
    pub edge: EdgeId,
    /// Proposal document involved, when there is one.
    pub document: Option<NodeId>,
    /// Category of the offending edge as kept in the scan result.
    pub category: Category,
    /// Human-readable description.
    pub message: String,
}

/// Per-category breakdown and trusted total of one scan.
#[derive(Clone, Debug, Serialize)]
pub struct Reconciliation {
    /// `proposal + closedprops + stagingprop`.
    pub total: u64,
    /// Edge count per edge name. Every known category is present.
    pub by_category: BTreeMap<String, u64>,
    /// Invariant breaches, capped at the reconciler's limit.
    pub violations: Vec<InvariantViolation>,
    /// Violations found, including the ones beyond the cap.
    pub violation_count: u64,
    /// Distinct edges reconciled.
    pub unique_edges: u64,
    /// Whether the underlying scan was complete.
    pub complete: bool,
    /// Whether the allowlist kept every category `total` sums. A narrowed
    /// scan still reports its sum, but not as the DAO's total.
    pub total_trusted: bool,
    /// Outcome categories whose closedprops check did not run because the
    /// allowlist dropped them or `closedprops`.
    pub skipped_checks: Vec<Category>,
}

impl Reconciliation {
    /// Edges counted under `category`.
    pub fn count(&self, category: &Category) -> u64 {
        self.by_category
            .get(category.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Complete, counted over every total category, and free of violations.
    pub fn is_clean(&self) -> bool {
        self.complete && self.total_trusted && self.violation_count == 0
    }
}

/// Partitions a scan result by category and checks that the informational
/// categories agree with the counted ones.
#[derive(Clone, Debug)]
pub struct CategoryReconciler {
    max_violations: usize,
}

impl Default for CategoryReconciler {
    fn default() -> Self {
        Self {
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }
}

impl CategoryReconciler {
    /// Reconciler keeping at most [`DEFAULT_MAX_VIOLATIONS`] violations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of violations kept in the report.
    pub fn max_violations(mut self, max: usize) -> Self {
        self.max_violations = max;
        self
    }

    /// Reconciles one scan result.
    pub fn reconcile(&self, scan: &ScanResult) -> Reconciliation {
        let mut by_category: BTreeMap<String, u64> = Category::KNOWN
            .iter()
            .map(|category| (category.as_str().to_string(), 0))
            .collect();
        let mut closed_documents: BTreeSet<&NodeId> = BTreeSet::new();
        for edge in scan.edges.values() {
            *by_category
                .entry(edge.category.as_str().to_string())
                .or_default() += 1;
            if edge.category == Category::ClosedProps {
                closed_documents.insert(&edge.to_node);
            }
        }

        let mut sink = ViolationSink::new(self.max_violations);
        for conflict in &scan.conflicts {
            sink.push(InvariantViolation {
                kind: ViolationKind::CategoryConflict,
                edge: conflict.id.clone(),
                document: Some(conflict.kept.to_node.clone()),
                category: conflict.kept.category.clone(),
                message: format!(
                    "edge {} seen as {} {}->{} and as {} {}->{}",
                    conflict.id,
                    conflict.kept.category,
                    conflict.kept.from_node,
                    conflict.kept.to_node,
                    conflict.replayed.category,
                    conflict.replayed.from_node,
                    conflict.replayed.to_node,
                ),
            });
        }
        let (checked, skipped_checks) = outcome_checks(&scan.categories);
        for edge in scan.edges.values() {
            if checked.contains(&edge.category) && !closed_documents.contains(&edge.to_node) {
                sink.push(InvariantViolation {
                    kind: ViolationKind::MissingClosedEdge,
                    edge: edge.id.clone(),
                    document: Some(edge.to_node.clone()),
                    category: edge.category.clone(),
                    message: format!(
                        "{} edge {} points at document {} which has no closedprops edge",
                        edge.category, edge.id, edge.to_node
                    ),
                });
            }
        }

        let total = Category::KNOWN
            .iter()
            .filter(|category| category.counts_toward_total())
            .map(|category| by_category.get(category.as_str()).copied().unwrap_or(0))
            .sum();
        let total_trusted = Category::KNOWN
            .iter()
            .filter(|category| category.counts_toward_total())
            .all(|category| scan.categories.allows(category));
        let (violations, violation_count) = sink.finish();
        let reconciliation = Reconciliation {
            total,
            by_category,
            violations,
            violation_count,
            unique_edges: scan.unique_edges() as u64,
            complete: scan.is_complete(),
            total_trusted,
            skipped_checks,
        };

        if !reconciliation.total_trusted {
            warn!(
                categories = %scan.categories,
                total = reconciliation.total,
                "reconcile.total_untrusted"
            );
        }
        if !reconciliation.skipped_checks.is_empty() {
            warn!(
                categories = %scan.categories,
                skipped = reconciliation.skipped_checks.len(),
                "reconcile.closed_check_skipped"
            );
        }

        if reconciliation.violation_count > 0 {
            warn!(
                violations = reconciliation.violation_count,
                total = reconciliation.total,
                "reconcile.violations"
            );
        }
        info!(
            total = reconciliation.total,
            unique_edges = reconciliation.unique_edges,
            complete = reconciliation.complete,
            "reconcile.completed"
        );
        reconciliation
    }
}

/// Splits the outcome categories into those whose closedprops check can run
/// under `filter` and those it has to skip.
fn outcome_checks(filter: &CategoryFilter) -> (Vec<Category>, Vec<Category>) {
    let closed_kept = filter.allows(&Category::ClosedProps);
    [Category::PassedProps, Category::FailedProps]
        .into_iter()
        .partition(|outcome| closed_kept && filter.allows(outcome))
}

struct ViolationSink {
    kept: Vec<InvariantViolation>,
    seen: u64,
    max: usize,
}

impl ViolationSink {
    fn new(max: usize) -> Self {
        Self {
            kept: Vec::new(),
            seen: 0,
            max,
        }
    }

    fn push(&mut self, violation: InvariantViolation) {
        self.seen += 1;
        if self.kept.len() < self.max {
            self.kept.push(violation);
        }
    }

    fn finish(self) -> (Vec<InvariantViolation>, u64) {
        (self.kept, self.seen)
    }
}
