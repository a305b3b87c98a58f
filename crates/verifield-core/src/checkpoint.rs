//! Checkpoint store: the last fully projected block per tracked source.
//!
//! A source is a contract address. The checkpoint is the only piece of state
//! whose write order gates the correctness of everything else: it is written
//! once per cycle, after every event in the cycle's range has been projected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// A persisted checkpoint for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Source identifier (lowercase contract address).
    pub source_id: String,
    /// Last block whose events were fully projected.
    pub block_number: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore` and, in
/// `verifield-storage`, `MemoryStore` and `SqliteStore`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint of a source, `None` if it was never written.
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) several checkpoints, all or nothing.
    async fn save_all(&self, checkpoints: &[Checkpoint]) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting an indexer).
    async fn delete(&self, source_id: &str) -> Result<(), IndexerError>;

    /// Last processed block of a source, `0` if absent.
    async fn read(&self, source_id: &str) -> Result<u64, IndexerError> {
        Ok(self.load(source_id).await?.map(|c| c.block_number).unwrap_or(0))
    }

    /// Upsert a single source's checkpoint.
    async fn write(&self, source_id: &str, block_number: u64) -> Result<(), IndexerError> {
        self.save_all(&[Checkpoint {
            source_id: source_id.to_string(),
            block_number,
            updated_at: chrono::Utc::now().timestamp(),
        }])
        .await
    }
}

/// Reads and advances the checkpoints of a group of sources indexed together.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    sources: Vec<String>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, sources: Vec<String>) -> Self {
        Self { store, sources }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// The group's position: the lowest checkpoint among its sources.
    ///
    /// Resuming from the lowest one re-reads blocks some sources already
    /// projected, which is harmless because projection is idempotent.
    pub async fn position(&self) -> Result<u64, IndexerError> {
        let mut lowest: Option<u64> = None;
        for source in &self.sources {
            let block = self.store.read(source).await?;
            lowest = Some(lowest.map_or(block, |l| l.min(block)));
        }
        Ok(lowest.unwrap_or(0))
    }

    /// Advance every source to `block_number` in one all-or-nothing write.
    ///
    /// A source already past `block_number` keeps its value, so checkpoints
    /// never move backwards.
    pub async fn advance(&self, block_number: u64) -> Result<(), IndexerError> {
        let now = chrono::Utc::now().timestamp();
        let mut updates = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let current = self.store.read(source).await?;
            if current < block_number {
                updates.push(Checkpoint {
                    source_id: source.clone(),
                    block_number,
                    updated_at: now,
                });
            }
        }
        if updates.is_empty() {
            return Ok(());
        }
        self.store.save_all(&updates).await?;
        tracing::debug!(block = block_number, sources = updates.len(), "checkpoint advanced");
        Ok(())
    }

    /// Checkpoints of every source, for status reporting.
    pub async fn snapshot(&self) -> Result<Vec<Checkpoint>, IndexerError> {
        let mut out = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            out.push(self.store.load(source).await?.unwrap_or(Checkpoint {
                source_id: source.clone(),
                block_number: 0,
                updated_at: 0,
            }));
        }
        Ok(out)
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Persistence("checkpoint store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.lock()?.get(source_id).cloned())
    }

    async fn save_all(&self, checkpoints: &[Checkpoint]) -> Result<(), IndexerError> {
        let mut data = self.lock()?;
        for cp in checkpoints {
            data.insert(cp.source_id.clone(), cp.clone());
        }
        Ok(())
    }

    async fn delete(&self, source_id: &str) -> Result<(), IndexerError> {
        self.lock()?.remove(source_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(store: Arc<MemoryCheckpointStore>) -> CheckpointManager {
        CheckpointManager::new(store, vec!["0xasset".into(), "0xmarket".into()])
    }

    #[tokio::test]
    async fn absent_checkpoint_reads_as_zero() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.read("0xunknown").await.unwrap(), 0);
        assert!(store.load("0xunknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read() {
        let store = MemoryCheckpointStore::new();
        store.write("0xasset", 1_000).await.unwrap();
        assert_eq!(store.read("0xasset").await.unwrap(), 1_000);
        store.delete("0xasset").await.unwrap();
        assert_eq!(store.read("0xasset").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn position_is_lowest_source() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.write("0xasset", 120).await.unwrap();
        store.write("0xmarket", 80).await.unwrap();
        assert_eq!(manager(store).position().await.unwrap(), 80);
    }

    #[tokio::test]
    async fn advance_never_moves_backwards() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.write("0xasset", 150).await.unwrap();
        let mgr = manager(store.clone());

        mgr.advance(100).await.unwrap();
        assert_eq!(store.read("0xasset").await.unwrap(), 150);
        assert_eq!(store.read("0xmarket").await.unwrap(), 100);

        mgr.advance(200).await.unwrap();
        assert_eq!(mgr.position().await.unwrap(), 200);
    }
}
