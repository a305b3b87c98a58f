//! The read-model store trait and the write set the projector hands to it.

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::model::{Activity, CreditEntry, Dataset, Ownership, Purchase};

/// The change a single event makes to its `Dataset` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetWrite {
    /// Insert the row if no row exists for its token id.
    Create(Dataset),
    /// Set `verified`; idempotent by construction.
    SetVerified { token_id: u64, verified: bool },
    /// Increment `buyers_count` and reassign `owner`. Applied only when the
    /// changeset's purchase row is newly inserted.
    Sale { token_id: u64, buyer: String },
}

/// Every write caused by one event. A store applies a changeset atomically:
/// either all of its new rows land or none do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub dataset: DatasetWrite,
    /// Insert-or-ignore on `(tx_hash, token_id)`.
    pub purchase: Option<Purchase>,
    /// Insert-or-ignore on `(tx_hash, log_index)`.
    pub ownership: Option<Ownership>,
    /// Insert-or-ignore on `(tx_hash, log_index)`.
    pub activity: Activity,
    /// Insert-or-ignore on `(tx_hash, log_index)`.
    pub credit: Option<CreditEntry>,
}

/// Result of applying a changeset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Number of rows inserted or updated. Zero means the event was a replay.
    pub rows_written: usize,
}

impl ApplyOutcome {
    pub fn is_replay(&self) -> bool {
        self.rows_written == 0
    }
}

/// Row counts per read-model table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadModelCounts {
    pub datasets: u64,
    pub purchases: u64,
    pub ownership: u64,
    pub activity: u64,
    pub ledger: u64,
}

/// Storage for the projected read model.
///
/// Implementations: `MemoryStore` and `SqliteStore` in `verifield-storage`.
/// Addresses are stored lowercase; query methods accept any case.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    /// Atomically apply one event's changeset with insert-or-ignore semantics.
    async fn apply(&self, changes: &Changeset) -> Result<ApplyOutcome, IndexerError>;

    async fn dataset(&self, token_id: u64) -> Result<Option<Dataset>, IndexerError>;

    /// Most recently minted datasets first.
    async fn recent_datasets(&self, limit: usize) -> Result<Vec<Dataset>, IndexerError>;

    async fn purchases_for(&self, token_id: u64) -> Result<Vec<Purchase>, IndexerError>;

    /// Ownership history of a token, oldest first.
    async fn ownership_history(&self, token_id: u64) -> Result<Vec<Ownership>, IndexerError>;

    /// Activity of an address, newest first.
    async fn activity_for(&self, address: &str, limit: usize)
        -> Result<Vec<Activity>, IndexerError>;

    async fn ledger_for(&self, address: &str) -> Result<Vec<CreditEntry>, IndexerError>;

    async fn counts(&self) -> Result<ReadModelCounts, IndexerError>;

    /// Sum of every ledger delta credited to `address`.
    async fn credit_balance(&self, address: &str) -> Result<U256, IndexerError> {
        let entries = self.ledger_for(address).await?;
        Ok(entries
            .iter()
            .fold(U256::ZERO, |acc, e| acc.saturating_add(e.delta)))
    }
}
