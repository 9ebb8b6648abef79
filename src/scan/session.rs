use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::{
    Deduplicator, EdgeConflict, EdgePredicate, Paginator, ScanOptions, ScanRequest, StopReason,
};
use crate::rpc::RangeScanClient;
use crate::types::{CategoryFilter, Edge, EdgeId};
use crate::ScanError;

/// Cooperative cancellation shared between a caller and running sessions.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every session holding this token to stop before its next page.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelToken::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reported after every page of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    /// 1-based page number.
    pub batch: u32,
    /// Rows on the page.
    pub rows: usize,
    /// Rows that passed the predicate.
    pub matched: usize,
    /// Matching rows with a new id.
    pub inserted: usize,
    /// Matching rows already collected.
    pub duplicates: usize,
    /// Distinct edges collected so far.
    pub unique_edges: usize,
    /// Whether the node reported more rows.
    pub more: bool,
}

/// Outcome of one full scan.
#[derive(Clone, Debug, Serialize)]
pub struct ScanResult {
    /// Distinct matching edges keyed by id.
    pub edges: BTreeMap<EdgeId, Edge>,
    /// Pages fetched.
    pub batches_fetched: u32,
    /// Rows received, before filtering.
    pub rows_seen: u64,
    /// Rows dropped by the predicate.
    pub rows_filtered_out: u64,
    /// Matching rows dropped as replays of an id already collected.
    pub duplicates_removed: u64,
    /// Replays that disagreed with the first observation of their id.
    pub conflicts: Vec<EdgeConflict>,
    /// Whether the scan ended before the node signalled completion.
    pub truncated: bool,
    /// How the scan ended.
    pub stop_reason: StopReason,
    /// Error that aborted the scan, if any.
    pub error: Option<ScanError>,
    /// Wall time spent, in milliseconds.
    pub duration_ms: f64,
    /// Allowlist the rows were filtered by.
    pub categories: CategoryFilter,
}

impl ScanResult {
    /// Empty, aborted result carrying `error`, filtered by the default
    /// allowlist.
    pub fn failed(error: ScanError) -> Self {
        finish(
            Deduplicator::new(),
            Tally::default(),
            StopReason::Aborted,
            Some(error),
            CategoryFilter::default(),
            Instant::now(),
        )
    }

    /// Distinct edges collected.
    pub fn unique_edges(&self) -> usize {
        self.edges.len()
    }

    /// Whether the result can be taken as the full enumeration.
    pub fn is_complete(&self) -> bool {
        !self.truncated
    }
}

/// One complete, deduplicated enumeration of an origin's edges.
pub struct ScanSession<C> {
    client: C,
    request: ScanRequest,
    options: ScanOptions,
    cancel: Option<CancelToken>,
}

impl<C: RangeScanClient> ScanSession<C> {
    /// Session reading through `client`.
    pub fn new(client: C, request: ScanRequest, options: ScanOptions) -> Self {
        Self {
            client,
            request,
            options,
            cancel: None,
        }
    }

    /// Stops the session before its next page once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Runs the scan to completion or abort.
    pub async fn run(self) -> ScanResult {
        self.run_with_progress(|_| {}).await
    }

    /// Runs the scan, calling `on_batch` after every page.
    ///
    /// Never fails: errors end the scan early and are attached to the
    /// returned, truncated result together with everything collected so far.
    pub async fn run_with_progress<F>(self, mut on_batch: F) -> ScanResult
    where
        F: FnMut(&BatchProgress),
    {
        let start = Instant::now();
        if let Err(err) = self.options.validate() {
            return ScanResult {
                categories: self.request.categories,
                ..ScanResult::failed(err)
            };
        }

        let predicate = EdgePredicate::new(
            self.request.origin.clone(),
            self.request.categories.clone(),
        );
        let first_page = self.request.first_page(self.options.page_size);
        let mut paginator = Paginator::new(self.client, first_page, self.options);
        let mut dedup = Deduplicator::new();
        let mut tally = Tally::default();
        let mut error = None;
        let mut cancelled = false;

        info!(
            origin = %self.request.origin,
            table = %self.request.target.table,
            categories = %self.request.categories,
            "scan.session.start"
        );

        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                cancelled = true;
                break;
            }
            let page = match paginator.next_page().await {
                None => break,
                Some(Ok(page)) => page,
                Some(Err(err)) => {
                    error = Some(err);
                    break;
                }
            };
            let rows = page.rows.len();
            let kept: Vec<Edge> = page
                .rows
                .into_iter()
                .filter(|edge| predicate.matches(edge))
                .collect();
            let matched = kept.len();
            let outcome = dedup.merge(kept);
            tally.rows_seen += rows as u64;
            tally.rows_filtered_out += (rows - matched) as u64;
            on_batch(&BatchProgress {
                batch: paginator.state().batches(),
                rows,
                matched,
                inserted: outcome.inserted,
                duplicates: outcome.duplicates,
                unique_edges: dedup.len(),
                more: page.more,
            });
        }
        tally.batches = paginator.state().batches();

        let stop = if cancelled {
            StopReason::Cancelled
        } else {
            paginator.state().stop_reason().unwrap_or(StopReason::Aborted)
        };
        if let Some(err) = &error {
            warn!(
                origin = %self.request.origin,
                batches = tally.batches,
                unique_edges = dedup.len(),
                error = %err,
                "scan.session.aborted"
            );
        }
        let result = finish(
            dedup,
            tally,
            stop,
            error,
            self.request.categories.clone(),
            start,
        );
        info!(
            origin = %self.request.origin,
            batches = result.batches_fetched,
            rows_seen = result.rows_seen,
            unique_edges = result.unique_edges(),
            duplicates_removed = result.duplicates_removed,
            truncated = result.truncated,
            stop_reason = ?result.stop_reason,
            duration_ms = result.duration_ms,
            "scan.session.completed"
        );
        result
    }
}

#[derive(Default)]
struct Tally {
    batches: u32,
    rows_seen: u64,
    rows_filtered_out: u64,
}

fn finish(
    dedup: Deduplicator,
    tally: Tally,
    stop: StopReason,
    error: Option<ScanError>,
    categories: CategoryFilter,
    start: Instant,
) -> ScanResult {
    let (edges, duplicates_removed, conflicts) = dedup.into_parts();
    ScanResult {
        edges,
        batches_fetched: tally.batches,
        rows_seen: tally.rows_seen,
        rows_filtered_out: tally.rows_filtered_out,
        duplicates_removed,
        conflicts,
        truncated: stop.is_truncated(),
        stop_reason: stop,
        error,
        duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
        categories,
    }
}
