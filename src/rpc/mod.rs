#![forbid(unsafe_code)]

//! Page-level access to the ledger's table-scan endpoint.
//!
//! A [`RangeScanClient`] issues exactly one bounded request per call and
//! parses the `{rows, more, next_key}` response. It never retries; retry and
//! cursor handling belong to [`crate::scan::Paginator`].

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{deserialize_next_key, Cursor, Edge};
use crate::Result;

mod http;
mod memory;

/// Production transport over HTTP.
pub use http::HttpRangeScanClient;

/// In-memory emulation of the by-origin index, with scripted faults.
pub use memory::{MemoryTable, PageFault};

/// Default node endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://mainnet.telos.net";
/// Default contract account (both `code` and `scope`).
pub const DEFAULT_CONTRACT: &str = "dao.hypha";
/// Table holding graph edges.
pub const EDGES_TABLE: &str = "edges";
/// Secondary index ordering edges by origin node.
pub const BY_FROM_INDEX: u8 = 2;
/// Comparison type of the by-origin index bounds.
pub const BY_FROM_KEY_TYPE: &str = "i64";

/// Which table and index a scan reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableTarget {
    /// Contract account owning the table.
    pub code: String,
    /// Table scope.
    pub scope: String,
    /// Table name.
    pub table: String,
    /// Secondary index position (1 is the primary key).
    pub index_position: u8,
    /// Comparison type of the index bounds.
    pub key_type: String,
}

impl TableTarget {
    /// The by-origin index of `contract`'s edges table.
    pub fn edges(contract: impl Into<String>) -> Self {
        let contract = contract.into();
        Self {
            code: contract.clone(),
            scope: contract,
            table: EDGES_TABLE.to_string(),
            index_position: BY_FROM_INDEX,
            key_type: BY_FROM_KEY_TYPE.to_string(),
        }
    }
}

impl Default for TableTarget {
    fn default() -> Self {
        Self::edges(DEFAULT_CONTRACT)
    }
}

/// Body of one `get_table_rows` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    /// Table and index being scanned.
    #[serde(flatten)]
    pub target: TableTarget,
    /// Resumption cursor; absent on an unseeded first call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<Cursor>,
    /// Inclusive upper bound on the index key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<Cursor>,
    /// Maximum rows per page.
    pub limit: u32,
    /// Ask the node to decode rows into JSON objects.
    pub json: bool,
}

impl PageRequest {
    /// Unbounded request template for `target`.
    pub fn new(target: TableTarget, limit: u32) -> Self {
        Self {
            target,
            lower_bound: None,
            upper_bound: None,
            limit,
            json: true,
        }
    }
}

/// One decoded page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PageResult {
    /// Rows in index order.
    pub rows: Vec<Edge>,
    /// Whether the node holds rows past this page.
    pub more: bool,
    /// Cursor for the next page.
    #[serde(default, deserialize_with = "deserialize_next_key")]
    pub next_key: Option<Cursor>,
}

/// Issues one bounded page request against a table-scan endpoint.
pub trait RangeScanClient {
    /// Fetches a single page. One outbound call, no retries.
    fn fetch_page(&self, request: &PageRequest) -> impl Future<Output = Result<PageResult>> + Send;
}

impl<T: RangeScanClient + Sync> RangeScanClient for &T {
    fn fetch_page(&self, request: &PageRequest) -> impl Future<Output = Result<PageResult>> + Send {
        (**self).fetch_page(request)
    }
}

impl<T: RangeScanClient + Send + Sync> RangeScanClient for Arc<T> {
    fn fetch_page(&self, request: &PageRequest) -> impl Future<Output = Result<PageResult>> + Send {
        (**self).fetch_page(request)
    }
}
