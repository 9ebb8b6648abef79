//! Deterministic enumeration of a DAO's proposal edges from a ledger node's
//! `edges` table.
//!
//! The node exposes a cursor-based secondary index range scan that may
//! replay, reorder or drop rows between pages and between full scans. This
//! crate pages through it ([`scan::Paginator`]), filters and deduplicates the
//! rows into one [`scan::ScanResult`] per full scan ([`scan::ScanSession`]),
//! compares repeated scans ([`verify::ConsistencyVerifier`]) and reconciles
//! per-category counts into a trusted total ([`verify::CategoryReconciler`]).

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod rpc;
pub mod scan;
pub mod types;
pub mod verify;

pub use error::{Result, ScanError};
pub use types::{Category, CategoryFilter, Cursor, Edge, EdgeId, Key, NodeId};
