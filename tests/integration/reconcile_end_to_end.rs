#![allow(missing_docs)]

use std::time::Duration;

use edgescan::{
    rpc::MemoryTable,
    scan::{RetryPolicy, ScanOptions, ScanRequest, ScanResult, ScanSession, StopReason},
    verify::{CategoryReconciler, ViolationKind},
    Category, CategoryFilter, Cursor, Edge, EdgeId, NodeId,
};

const DAO: u64 = 29983;
const CLOSED: u64 = 1_000;
const STAGING: u64 = 150;
const PROPOSALS: u64 = 53;

const CLOSED_DOCS: u64 = 100_000;
const STAGING_DOCS: u64 = 200_000;
const PROPOSAL_DOCS: u64 = 300_000;

/// The DAO's lifecycle edges plus a neighbouring DAO's rows that sort
/// before it in the by-origin index.
fn lifecycle_rows() -> Vec<Edge> {
    let mut rows = Vec::new();
    for n in 1..=CLOSED {
        rows.push(Edge::new(n, DAO, CLOSED_DOCS + n, Category::ClosedProps));
    }
    for n in 1..=STAGING {
        rows.push(Edge::new(
            CLOSED + n,
            DAO,
            STAGING_DOCS + n,
            Category::StagingProp,
        ));
    }
    for n in 1..=PROPOSALS {
        rows.push(Edge::new(
            CLOSED + STAGING + n,
            DAO,
            PROPOSAL_DOCS + n,
            Category::Proposal,
        ));
    }
    for n in 1..=40u64 {
        rows.push(Edge::new(900_000 + n, DAO - 1, 7u64, Category::ClosedProps));
    }
    rows
}

/// `passedprops` and `failedprops` edges pointing at closed documents.
fn outcome_rows() -> Vec<Edge> {
    let mut rows = Vec::new();
    for n in 1..=120u64 {
        rows.push(Edge::new(
            5_000 + n,
            DAO,
            CLOSED_DOCS + n,
            Category::PassedProps,
        ));
    }
    for n in 1..=25u64 {
        rows.push(Edge::new(
            6_000 + n,
            DAO,
            CLOSED_DOCS + 500 + n,
            Category::FailedProps,
        ));
    }
    rows
}

fn options() -> ScanOptions {
    ScanOptions::default()
        .page_size(500)
        .inter_batch_delay(Duration::ZERO)
        .retry(RetryPolicy::none())
}

async fn scan(table: &MemoryTable) -> (ScanResult, Vec<usize>) {
    let mut page_rows = Vec::new();
    let result = ScanSession::new(table, ScanRequest::new(DAO), options())
        .run_with_progress(|progress| page_rows.push(progress.rows))
        .await;
    (result, page_rows)
}

#[tokio::test]
async fn dao_total_comes_from_three_batches() {
    let table = MemoryTable::new(lifecycle_rows());
    let (result, page_rows) = scan(&table).await;

    assert_eq!(page_rows, vec![500, 500, 203]);
    assert_eq!(result.batches_fetched, 3);
    assert_eq!(result.stop_reason, StopReason::Exhausted);
    assert_eq!(result.duplicates_removed, 0);
    assert_eq!(table.requests()[0].lower_bound, Some(Cursor::new("29983")));

    let reconciliation = CategoryReconciler::new().reconcile(&result);
    assert_eq!(reconciliation.total, 1_203);
    assert_eq!(reconciliation.count(&Category::ClosedProps), CLOSED);
    assert_eq!(reconciliation.count(&Category::StagingProp), STAGING);
    assert_eq!(reconciliation.count(&Category::Proposal), PROPOSALS);
    assert!(reconciliation.violations.is_empty());
    assert!(reconciliation.complete);
    assert!(reconciliation.is_clean());
}

#[tokio::test]
async fn outcome_edges_are_informational() {
    let mut rows = lifecycle_rows();
    rows.extend(outcome_rows());
    let table = MemoryTable::new(rows);
    let (result, page_rows) = scan(&table).await;

    assert_eq!(page_rows, vec![500, 500, 348]);
    assert_eq!(result.unique_edges(), 1_348);

    let reconciliation = CategoryReconciler::new().reconcile(&result);
    assert_eq!(reconciliation.total, 1_203);
    assert_eq!(reconciliation.count(&Category::PassedProps), 120);
    assert_eq!(reconciliation.count(&Category::FailedProps), 25);
    assert_eq!(reconciliation.violation_count, 0);
    assert!(reconciliation.is_clean());
}

#[tokio::test]
async fn passed_edge_without_closed_document_is_flagged() {
    let mut rows = lifecycle_rows();
    rows.extend(outcome_rows());
    rows.push(Edge::new(7_777u64, DAO, 424_242u64, Category::PassedProps));
    let table = MemoryTable::new(rows);
    let (result, _) = scan(&table).await;

    let reconciliation = CategoryReconciler::new().reconcile(&result);
    assert_eq!(reconciliation.total, 1_203);
    assert_eq!(reconciliation.violation_count, 1);
    let violation = &reconciliation.violations[0];
    assert_eq!(violation.kind, ViolationKind::MissingClosedEdge);
    assert_eq!(violation.edge, EdgeId::from(7_777u64));
    assert_eq!(violation.document, Some(NodeId::from(424_242u64)));
    assert!(violation.message.contains("7777"));
    assert!(!reconciliation.is_clean());
}

#[tokio::test]
async fn truncated_scan_reports_a_lower_bound() {
    let table = MemoryTable::new(lifecycle_rows());
    let result = ScanSession::new(&table, ScanRequest::new(DAO), options().max_batches(2))
        .run()
        .await;

    assert!(result.truncated);
    let reconciliation = CategoryReconciler::new().reconcile(&result);
    assert_eq!(reconciliation.total, 1_000);
    assert!(!reconciliation.complete);
    assert!(!reconciliation.is_clean());
}

async fn scan_only(table: &MemoryTable, names: &[&str]) -> ScanResult {
    let request = ScanRequest::new(DAO).categories(CategoryFilter::only(names.iter().copied()));
    ScanSession::new(table, request, options()).run().await
}

#[tokio::test]
async fn outcome_only_scan_skips_the_closed_check() {
    let mut rows = lifecycle_rows();
    rows.extend(outcome_rows());
    let table = MemoryTable::new(rows);
    let result = scan_only(&table, &["passedprops"]).await;
    assert_eq!(result.unique_edges(), 120);

    let reconciliation = CategoryReconciler::new().reconcile(&result);
    assert_eq!(reconciliation.violation_count, 0);
    assert!(reconciliation
        .skipped_checks
        .contains(&Category::PassedProps));
    assert!(!reconciliation.total_trusted);
    assert!(!reconciliation.is_clean());
}

#[tokio::test]
async fn closed_only_scan_is_not_the_dao_total() {
    let table = MemoryTable::new(lifecycle_rows());
    let result = scan_only(&table, &["closedprops"]).await;
    assert!(result.is_complete());

    let reconciliation = CategoryReconciler::new().reconcile(&result);
    assert_eq!(reconciliation.total, CLOSED);
    assert_eq!(reconciliation.violation_count, 0);
    assert!(reconciliation.complete);
    assert!(!reconciliation.total_trusted);
    assert!(!reconciliation.is_clean());
}
