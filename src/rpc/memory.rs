use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{PageRequest, PageResult, RangeScanClient};
use crate::types::{Cursor, Edge, EdgeId, Key, NodeId};
use crate::{Result, ScanError};

const CURSOR_SEP: char = '#';

/// Misbehavior injected into one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageFault {
    /// Fail with a transport error.
    Transport(String),
    /// Fail with a protocol error.
    Protocol(String),
    /// Return a page with no rows while claiming more remain.
    EmptyPage,
    /// Return the page with `more = true` but no `next_key`.
    DropNextKey,
}

/// An in-memory `edges` table ordered like the by-origin index.
///
/// Rows are kept sorted by `(from_node, id)`. A `lower_bound` that is a
/// plain key seeks to the first row whose origin is at or above it; cursors
/// handed out in `next_key` resume at an exact row. Each request with a
/// plain (or absent) lower bound starts a new full scan, and the n-th full
/// scan reads the n-th dataset given to [`MemoryTable::with_scans`] (the
/// last dataset is reused once they run out), which is how tests model a
/// node that answers repeated scans differently.
#[derive(Debug)]
pub struct MemoryTable {
    scans: Vec<Vec<Edge>>,
    overlap: usize,
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    requests: Vec<PageRequest>,
    faults: BTreeMap<usize, PageFault>,
    full_scans: usize,
    active: usize,
    last_failed: Option<PageRequest>,
}

impl MemoryTable {
    /// Table answering every scan with `rows`.
    pub fn new(rows: Vec<Edge>) -> Self {
        Self::with_scans(vec![rows])
    }

    /// Table answering the n-th full scan with `scans[n]`.
    pub fn with_scans(scans: Vec<Vec<Edge>>) -> Self {
        let mut scans: Vec<Vec<Edge>> = scans
            .into_iter()
            .map(|mut rows| {
                rows.sort_by(|a, b| (&a.from_node, &a.id).cmp(&(&b.from_node, &b.id)));
                rows
            })
            .collect();
        if scans.is_empty() {
            scans.push(Vec::new());
        }
        Self {
            scans,
            overlap: 0,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Replays the last `rows` rows of the previous page at the start of
    /// every resumed page.
    pub fn with_overlap(mut self, rows: usize) -> Self {
        self.overlap = rows;
        self
    }

    /// Schedules `fault` for the request with 0-based `ordinal`.
    pub fn fail_request(&self, ordinal: usize, fault: PageFault) {
        self.state.lock().faults.insert(ordinal, fault);
    }

    /// Number of requests received so far, failed ones included.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Copy of every request received so far.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of full scans started so far.
    pub fn full_scans(&self) -> usize {
        self.state.lock().full_scans
    }

    fn page(&self, dataset: usize, request: &PageRequest) -> PageResult {
        let rows = &self.scans[dataset];
        let (start, resumed) = match request.lower_bound.as_ref() {
            None => (0, false),
            Some(cursor) => match parse_resume(cursor) {
                Some((from, id)) => (
                    rows.partition_point(|e| (&e.from_node, &e.id) < (&from, &id)),
                    true,
                ),
                None => {
                    let from = NodeId(Key::parse(cursor.as_str()));
                    (rows.partition_point(|e| e.from_node < from), false)
                }
            },
        };
        let end = match request.upper_bound.as_ref() {
            Some(cursor) => {
                let upper = NodeId(Key::parse(cursor.as_str()));
                rows.partition_point(|e| e.from_node <= upper)
            }
            None => rows.len(),
        };
        let start = start.min(end);
        let begin = if resumed {
            start - self.overlap.min(start)
        } else {
            start
        };
        let stop = start.saturating_add(request.limit as usize).min(end);
        let more = stop < end;
        PageResult {
            rows: rows[begin..stop].to_vec(),
            more,
            next_key: more.then(|| resume_cursor(&rows[stop])),
        }
    }
}

impl RangeScanClient for MemoryTable {
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult> {
        let mut state = self.state.lock();
        let ordinal = state.requests.len();
        state.requests.push(request.clone());

        let starts_scan = request
            .lower_bound
            .as_ref()
            .map_or(true, |cursor| parse_resume(cursor).is_none());
        let is_retry = state.last_failed.as_ref() == Some(request);
        if starts_scan && !is_retry {
            state.full_scans += 1;
            state.active = (state.full_scans - 1).min(self.scans.len() - 1);
        }

        let fault = state.faults.remove(&ordinal);
        let outcome = match fault {
            Some(PageFault::Transport(msg)) => Err(ScanError::Transport(msg)),
            Some(PageFault::Protocol(msg)) => Err(ScanError::Protocol(msg)),
            Some(PageFault::EmptyPage) => Ok(PageResult {
                rows: Vec::new(),
                more: true,
                next_key: request.lower_bound.clone(),
            }),
            Some(PageFault::DropNextKey) => {
                let mut page = self.page(state.active, request);
                page.more = true;
                page.next_key = None;
                Ok(page)
            }
            None => Ok(self.page(state.active, request)),
        };
        state.last_failed = outcome.is_err().then(|| request.clone());
        outcome
    }
}

fn resume_cursor(edge: &Edge) -> Cursor {
    Cursor(format!("{}{CURSOR_SEP}{}", edge.from_node, edge.id))
}

fn parse_resume(cursor: &Cursor) -> Option<(NodeId, EdgeId)> {
    let (from, id) = cursor.as_str().split_once(CURSOR_SEP)?;
    Some((NodeId(Key::parse(from)), EdgeId(Key::parse(id))))
}
