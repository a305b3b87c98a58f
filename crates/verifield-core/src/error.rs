//! Error types for the indexing pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can abort an indexing cycle.
///
/// Every variant aborts the current cycle only. The checkpoint is written
/// last, so none of them can leave it ahead of the projected read model.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Transport-level RPC failure (connection refused, HTTP 5xx, 429...).
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    /// The node answered, but with an error object or a malformed body.
    #[error("chain query error: {0}")]
    ChainQuery(String),

    /// A log matching a known signature could not be decoded.
    #[error("decode error for {signature} log in tx {tx_hash}: {reason}")]
    Decode {
        signature: String,
        tx_hash: String,
        reason: String,
    },

    /// An event references a token the read model does not know about.
    #[error("consistency error: {event} for unknown token {token_id} at block {block_number}")]
    Consistency {
        event: String,
        token_id: u64,
        block_number: u64,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("cycle exceeded its {ms}ms budget")]
    Timeout { ms: u64 },

    /// Another cycle holds the single-flight guard for this source group.
    #[error("an indexing cycle is already running for {sources}")]
    CycleInProgress { sources: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Serializable error taxonomy reported at the trigger boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    ChainUnavailable,
    ChainQueryError,
    DecodeError,
    ConsistencyError,
    PersistenceError,
    Timeout,
    CycleInProgress,
    ConfigError,
}

impl IndexerError {
    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChainUnavailable(_) => ErrorKind::ChainUnavailable,
            Self::ChainQuery(_) => ErrorKind::ChainQueryError,
            Self::Decode { .. } => ErrorKind::DecodeError,
            Self::Consistency { .. } => ErrorKind::ConsistencyError,
            Self::Persistence(_) => ErrorKind::PersistenceError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CycleInProgress { .. } => ErrorKind::CycleInProgress,
            Self::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Returns `true` if the error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChainUnavailable(_))
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ChainUnavailable => "ChainUnavailable",
            Self::ChainQueryError => "ChainQueryError",
            Self::DecodeError => "DecodeError",
            Self::ConsistencyError => "ConsistencyError",
            Self::PersistenceError => "PersistenceError",
            Self::Timeout => "Timeout",
            Self::CycleInProgress => "CycleInProgress",
            Self::ConfigError => "ConfigError",
        };
        f.write_str(s)
    }
}
