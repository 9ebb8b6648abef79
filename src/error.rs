use serde::{Serialize, Serializer};
use thiserror::Error;

/// Result alias used across the scanner.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Failure talking to the ledger node or driving a scan.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    /// Network, timeout or HTTP status failure. Retried by the paginator.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response could not be parsed into a page. Never retried.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Scan parameters are unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The task running the scan ended without producing a result.
    #[error("scan interrupted: {0}")]
    Interrupted(String),
}

impl ScanError {
    /// Whether a retry has any chance of producing a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Transport(_))
    }

    /// Short machine-friendly label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Transport(_) => "transport",
            ScanError::Protocol(_) => "protocol",
            ScanError::Config(_) => "config",
            ScanError::Interrupted(_) => "interrupted",
        }
    }
}

impl Serialize for ScanError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
