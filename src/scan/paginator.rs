//! Cursor-driven page sequence over one full scan.
//!
//! The by-origin index is a secondary index: rows of other origins can be
//! interleaved with the ones being collected, and the node gives no exact
//! upper bound for "every row of this origin". The paginator therefore never
//! stops because a page held no rows of interest. It stops only on a truly
//! empty page, on `more = false`, on the batch cap, or on an error. Earlier
//! tooling disagreed on this point and stopping at the first non-matching
//! page silently loses rows.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::ScanOptions;
use crate::rpc::{PageRequest, PageResult, RangeScanClient};
use crate::types::Cursor;
use crate::{Result, ScanError};

/// Why a page sequence ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The node reported `more = false`.
    Exhausted,
    /// The node returned a page without rows.
    EmptyPage,
    /// `max_batches` pages were fetched while the node still had more.
    BatchCap,
    /// The caller cancelled the scan.
    Cancelled,
    /// A transport or protocol error ended the scan.
    Aborted,
}

impl StopReason {
    /// Whether the scan ended before the node signalled completion.
    pub fn is_truncated(self) -> bool {
        !matches!(self, StopReason::Exhausted | StopReason::EmptyPage)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Phase {
    Running,
    Failing(ScanError),
    Done(StopReason),
}

/// Progress of one page sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanState {
    cursor: Option<Cursor>,
    batches: u32,
    phase: Phase,
}

impl ScanState {
    fn new(cursor: Option<Cursor>) -> Self {
        Self {
            cursor,
            batches: 0,
            phase: Phase::Running,
        }
    }

    /// Cursor the next page will be requested from.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Pages fetched so far.
    pub fn batches(&self) -> u32 {
        self.batches
    }

    /// Why the sequence ended, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.phase {
            Phase::Done(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Lazy, finite, non-restartable sequence of pages.
///
/// Restarting a scan means building a new paginator, which starts again
/// from the seed cursor.
pub struct Paginator<C> {
    client: C,
    template: PageRequest,
    options: ScanOptions,
    state: ScanState,
}

impl<C: RangeScanClient> Paginator<C> {
    /// Sequence starting at `first_page`'s lower bound.
    pub fn new(client: C, first_page: PageRequest, options: ScanOptions) -> Self {
        let mut template = first_page;
        template.limit = options.page_size;
        let state = ScanState::new(template.lower_bound.take());
        Self {
            client,
            template,
            options,
            state,
        }
    }

    /// Current progress.
    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Fetches the next page, or `None` once the sequence has ended.
    ///
    /// The page that triggers a stop is still returned. An error is returned
    /// once and then the sequence ends with [`StopReason::Aborted`].
    pub async fn next_page(&mut self) -> Option<Result<PageResult>> {
        match std::mem::replace(&mut self.state.phase, Phase::Running) {
            Phase::Running => {}
            Phase::Failing(err) => {
                self.state.phase = Phase::Done(StopReason::Aborted);
                return Some(Err(err));
            }
            done @ Phase::Done(_) => {
                self.state.phase = done;
                return None;
            }
        }

        if self.state.batches > 0 && !self.options.inter_batch_delay.is_zero() {
            tokio::time::sleep(self.options.inter_batch_delay).await;
        }

        let mut request = self.template.clone();
        request.lower_bound = self.state.cursor.clone();
        let client = &self.client;
        let fetched = self
            .options
            .retry
            .run("get_table_rows", |_| client.fetch_page(&request))
            .await;
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                warn!(
                    batch = self.state.batches + 1,
                    cursor = self.state.cursor.as_ref().map(Cursor::as_str),
                    kind = err.kind(),
                    error = %err,
                    "scan.page.failed"
                );
                self.state.phase = Phase::Done(StopReason::Aborted);
                return Some(Err(err));
            }
        };
        self.state.batches += 1;
        debug!(
            batch = self.state.batches,
            rows = page.rows.len(),
            more = page.more,
            next_key = page.next_key.as_ref().map(Cursor::as_str),
            "scan.page.fetched"
        );
        self.advance(&page);
        Some(Ok(page))
    }

    fn advance(&mut self, page: &PageResult) {
        let stop = if page.rows.is_empty() {
            Some(StopReason::EmptyPage)
        } else if !page.more {
            Some(StopReason::Exhausted)
        } else if self.state.batches >= self.options.max_batches {
            info!(
                max_batches = self.options.max_batches,
                "scan.page.batch_cap"
            );
            Some(StopReason::BatchCap)
        } else {
            None
        };
        if let Some(reason) = stop {
            self.state.phase = Phase::Done(reason);
            return;
        }

        match page.next_key.clone() {
            Some(next) => {
                if self.state.cursor.as_ref() == Some(&next) {
                    warn!(
                        cursor = next.as_str(),
                        batch = self.state.batches,
                        "scan.page.cursor_stalled"
                    );
                }
                self.state.cursor = Some(next);
            }
            None => {
                self.state.phase = Phase::Failing(ScanError::Protocol(
                    "node reported more rows without a next_key".into(),
                ));
            }
        }
    }
}
