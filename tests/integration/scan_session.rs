#![allow(missing_docs)]

use std::time::Duration;

use edgescan::{
    rpc::{MemoryTable, PageFault},
    scan::{Backoff, CursorSeed, RetryPolicy, ScanOptions, ScanRequest, ScanSession, StopReason},
    Category, CategoryFilter, Cursor, Edge, EdgeId, ScanError,
};

fn options(page_size: u32) -> ScanOptions {
    ScanOptions::default()
        .page_size(page_size)
        .inter_batch_delay(Duration::ZERO)
        .retry(RetryPolicy::none())
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        backoff: Backoff::Fixed,
        ..RetryPolicy::default()
    }
}

fn origin_rows(origin: u64, ids: std::ops::Range<u64>, category: Category) -> Vec<Edge> {
    ids.map(|id| Edge::new(id, origin, 10_000 + id, category.clone()))
        .collect()
}

#[tokio::test]
async fn collects_every_row_when_page_size_does_not_divide_total() {
    let table = MemoryTable::new(origin_rows(7, 0..23, Category::ClosedProps));
    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(5))
        .run()
        .await;

    assert!(result.is_complete());
    assert_eq!(result.stop_reason, StopReason::Exhausted);
    assert_eq!(result.unique_edges(), 23);
    assert_eq!(result.batches_fetched, 5);
    assert_eq!(table.request_count(), 5);
    assert_eq!(result.duplicates_removed, 0);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn first_request_seeks_to_the_origin() {
    let mut rows = origin_rows(6, 0..4, Category::Proposal);
    rows.extend(origin_rows(7, 4..8, Category::Proposal));
    let table = MemoryTable::new(rows);
    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(10))
        .run()
        .await;

    let requests = table.requests();
    assert_eq!(requests[0].lower_bound, Some(Cursor::new("7")));
    assert_eq!(result.unique_edges(), 4);
    assert_eq!(result.rows_filtered_out, 0);
}

#[tokio::test]
async fn pages_without_matching_rows_do_not_end_the_scan() {
    let mut rows = origin_rows(6, 0..8, Category::ClosedProps);
    rows.extend(origin_rows(7, 8..13, Category::ClosedProps));
    rows.extend(origin_rows(8, 13..19, Category::ClosedProps));
    let table = MemoryTable::new(rows);
    let request = ScanRequest::new(7u64).seed(CursorSeed::IndexStart);

    let mut matched_per_page = Vec::new();
    let result = ScanSession::new(&table, request, options(4))
        .run_with_progress(|progress| matched_per_page.push(progress.matched))
        .await;

    assert_eq!(&matched_per_page[..2], &[0, 0]);
    assert_eq!(result.unique_edges(), 5);
    assert_eq!(result.rows_seen, 19);
    assert_eq!(result.rows_filtered_out, 14);
    assert_eq!(result.stop_reason, StopReason::Exhausted);
}

#[tokio::test]
async fn bounded_scan_stops_at_the_origin() {
    let mut rows = origin_rows(7, 0..6, Category::Proposal);
    rows.extend(origin_rows(8, 6..40, Category::Proposal));
    let table = MemoryTable::new(rows);
    let mut request = ScanRequest::new(7u64);
    request.bound_to_origin = true;

    let result = ScanSession::new(&table, request, options(4)).run().await;

    assert_eq!(result.unique_edges(), 6);
    assert_eq!(result.batches_fetched, 2);
    assert_eq!(table.requests()[0].upper_bound, Some(Cursor::new("7")));
}

#[tokio::test]
async fn category_filter_drops_other_edge_names() {
    let mut rows = origin_rows(7, 0..4, Category::ClosedProps);
    rows.extend(origin_rows(7, 4..7, Category::Votable));
    rows.push(Edge::new(7u64, 7u64, 1u64, Category::from_name("memberof")));
    let table = MemoryTable::new(rows);

    let closed_only = ScanRequest::new(7u64).categories(CategoryFilter::only(["closedprops"]));
    let result = ScanSession::new(&table, closed_only, options(3)).run().await;
    assert_eq!(result.unique_edges(), 4);
    assert_eq!(result.rows_filtered_out, 4);

    let known = ScanSession::new(&table, ScanRequest::new(7u64), options(3))
        .run()
        .await;
    assert_eq!(known.unique_edges(), 7);

    let any = ScanRequest::new(7u64).categories(CategoryFilter::Any);
    let everything = ScanSession::new(&table, any, options(3)).run().await;
    assert_eq!(everything.unique_edges(), 8);
}

#[tokio::test]
async fn string_and_numeric_ids_are_the_same_node() {
    let rows: Vec<Edge> = serde_json::from_str(
        r#"[
            {"id": 1, "from_node": 29983, "to_node": 5, "edge_name": "proposal"},
            {"id": "2", "from_node": "29983", "to_node": "6", "edge_name": "closedprops"},
            {"id": "3", "from_node": "029983", "to_node": 7, "edge_name": "stagingprop"}
        ]"#,
    )
    .unwrap();
    let table = MemoryTable::new(rows);
    let result = ScanSession::new(&table, ScanRequest::new("29983"), options(2))
        .run()
        .await;
    assert_eq!(result.unique_edges(), 3);
}

#[tokio::test]
async fn transient_transport_errors_are_retried() {
    let table = MemoryTable::new(origin_rows(7, 0..12, Category::Proposal));
    table.fail_request(1, PageFault::Transport("connection reset".into()));
    table.fail_request(2, PageFault::Transport("connection reset".into()));

    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(5).retry(fast_retries(3)))
        .run()
        .await;

    assert!(result.is_complete());
    assert!(result.error.is_none());
    assert_eq!(result.unique_edges(), 12);
    assert_eq!(result.batches_fetched, 3);
    assert_eq!(table.request_count(), 5);
}

#[tokio::test]
async fn exhausted_retries_keep_the_partial_result() {
    let table = MemoryTable::new(origin_rows(7, 0..12, Category::Proposal));
    for ordinal in 1..=3 {
        table.fail_request(ordinal, PageFault::Transport("timed out".into()));
    }

    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(5).retry(fast_retries(2)))
        .run()
        .await;

    assert!(result.truncated);
    assert_eq!(result.stop_reason, StopReason::Aborted);
    assert_eq!(result.unique_edges(), 5);
    assert_eq!(result.batches_fetched, 1);
    assert!(matches!(result.error, Some(ScanError::Transport(_))));
    assert_eq!(table.request_count(), 4);
}

#[tokio::test]
async fn protocol_errors_are_not_retried() {
    let table = MemoryTable::new(origin_rows(7, 0..12, Category::Proposal));
    table.fail_request(1, PageFault::Protocol("rows is not an array".into()));

    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(5).retry(fast_retries(3)))
        .run()
        .await;

    assert!(result.truncated);
    assert!(matches!(result.error, Some(ScanError::Protocol(_))));
    assert_eq!(result.unique_edges(), 5);
    assert_eq!(table.request_count(), 2);
}

#[tokio::test]
async fn replayed_rows_are_counted_once() {
    let table = MemoryTable::new(origin_rows(7, 0..12, Category::ClosedProps)).with_overlap(2);
    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(5))
        .run()
        .await;

    assert!(result.is_complete());
    assert_eq!(result.unique_edges(), 12);
    assert_eq!(result.rows_seen, 16);
    assert_eq!(result.duplicates_removed, 4);
    assert!(result.conflicts.is_empty());
}

#[tokio::test]
async fn batch_cap_marks_the_result_truncated() {
    let table = MemoryTable::new(origin_rows(7, 0..30, Category::ClosedProps));
    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(5).max_batches(3))
        .run()
        .await;

    assert!(result.truncated);
    assert_eq!(result.stop_reason, StopReason::BatchCap);
    assert_eq!(result.unique_edges(), 15);
    assert!(result.error.is_none());
    assert!(result.edges.contains_key(&EdgeId::from(14u64)));
    assert!(!result.edges.contains_key(&EdgeId::from(15u64)));
}

#[tokio::test]
async fn empty_page_ends_the_scan_without_truncation() {
    let table = MemoryTable::new(origin_rows(7, 0..12, Category::ClosedProps));
    table.fail_request(1, PageFault::EmptyPage);
    let result = ScanSession::new(&table, ScanRequest::new(7u64), options(5))
        .run()
        .await;

    assert_eq!(result.stop_reason, StopReason::EmptyPage);
    assert!(!result.truncated);
    assert_eq!(result.unique_edges(), 5);
}
