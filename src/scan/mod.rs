#![forbid(unsafe_code)]

//! One full, deduplicated scan of an origin node's edges.
//!
//! Pages come from a [`Paginator`], pass through an [`EdgePredicate`] and are
//! folded into a [`Deduplicator`]; [`ScanSession`] wires the three together
//! and always hands back a [`ScanResult`], partial or not.

mod dedup;
mod options;
mod paginator;
mod predicate;
mod retry;
mod session;

/// Idempotent merge of rows keyed by edge id.
pub use dedup::{Deduplicator, EdgeConflict, MergeOutcome};

/// Scan target and paging parameters.
pub use options::{
    CursorSeed, ScanOptions, ScanRequest, DEFAULT_INTER_BATCH_DELAY, DEFAULT_MAX_BATCHES,
    DEFAULT_PAGE_SIZE,
};

/// Cursor-driven page sequence.
pub use paginator::{Paginator, ScanState, StopReason};

/// Origin and category filter.
pub use predicate::{matches, EdgePredicate};

/// Retry of transient transport failures.
pub use retry::{Backoff, RetryPolicy};

/// Session orchestration.
pub use session::{BatchProgress, CancelToken, ScanResult, ScanSession};
