use std::time::Duration;

use serde::Serialize;

use super::RetryPolicy;
use crate::rpc::{PageRequest, TableTarget};
use crate::types::{CategoryFilter, Cursor, NodeId};
use crate::{Result, ScanError};

/// Default rows per page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;
/// Default safety cap on pages per scan.
pub const DEFAULT_MAX_BATCHES: u32 = 100;
/// Default pause between pages.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_millis(50);

/// Where the first page of a scan starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorSeed {
    /// Seek straight to the origin node in the by-origin index.
    #[default]
    Origin,
    /// Start at the index minimum.
    IndexStart,
}

/// What a scan enumerates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    /// Table and index to read.
    pub target: TableTarget,
    /// DAO whose edges are collected.
    pub origin: NodeId,
    /// Categories kept.
    pub categories: CategoryFilter,
    /// Starting position of the first page.
    pub seed: CursorSeed,
    /// Send the origin as an inclusive `upper_bound` on every page.
    pub bound_to_origin: bool,
}

impl ScanRequest {
    /// Default target and filter for `origin`.
    pub fn new(origin: impl Into<NodeId>) -> Self {
        Self {
            target: TableTarget::default(),
            origin: origin.into(),
            categories: CategoryFilter::default(),
            seed: CursorSeed::default(),
            bound_to_origin: false,
        }
    }

    /// Replaces the category allowlist.
    pub fn categories(mut self, categories: CategoryFilter) -> Self {
        self.categories = categories;
        self
    }

    /// Replaces the table target.
    pub fn target(mut self, target: TableTarget) -> Self {
        self.target = target;
        self
    }

    /// Replaces the cursor seed.
    pub fn seed(mut self, seed: CursorSeed) -> Self {
        self.seed = seed;
        self
    }

    /// Template for the first page of a scan.
    pub(crate) fn first_page(&self, limit: u32) -> PageRequest {
        let mut request = PageRequest::new(self.target.clone(), limit);
        if self.seed == CursorSeed::Origin {
            request.lower_bound = Some(Cursor::from(&self.origin));
        }
        if self.bound_to_origin {
            request.upper_bound = Some(Cursor::from(&self.origin));
        }
        request
    }
}

/// How a scan pages through the table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanOptions {
    /// Rows requested per page.
    pub page_size: u32,
    /// Pages fetched before the scan is cut off as truncated.
    pub max_batches: u32,
    /// Politeness pause before every page but the first.
    pub inter_batch_delay: Duration,
    /// Retry of transport failures.
    pub retry: RetryPolicy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_batches: DEFAULT_MAX_BATCHES,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            retry: RetryPolicy::default(),
        }
    }
}

impl ScanOptions {
    /// Sets the page size.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the batch cap.
    pub fn max_batches(mut self, max_batches: u32) -> Self {
        self.max_batches = max_batches;
        self
    }

    /// Sets the inter-batch delay.
    pub fn inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rejects values that would make a scan meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ScanError::Config("page_size must be at least 1".into()));
        }
        if self.max_batches == 0 {
            return Err(ScanError::Config("max_batches must be at least 1".into()));
        }
        Ok(())
    }
}
