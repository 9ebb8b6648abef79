//! Checks run over finished scans.
//!
//! [`ConsistencyVerifier`] repeats a full scan to detect a node that answers
//! differently from one scan to the next. [`CategoryReconciler`] turns one
//! scan into a per-category breakdown and the trusted proposal total.

mod consistency;
mod reconcile;

pub use consistency::{
    ConsistencyReport, ConsistencyVerifier, RunSummary, Verdict, Verification,
    DEFAULT_INTER_RUN_DELAY,
};
pub use reconcile::{
    CategoryReconciler, InvariantViolation, Reconciliation, ViolationKind,
    DEFAULT_MAX_VIOLATIONS,
};
