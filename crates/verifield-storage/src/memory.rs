//! In-memory storage backend.
//!
//! Keeps checkpoints and the whole read model in RAM. Each changeset is
//! applied under a single lock acquisition, which makes it atomic.
//! Useful for tests and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use verifield_core::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
use verifield_core::error::IndexerError;
use verifield_core::model::{Activity, CreditEntry, Dataset, Ownership, Purchase};
use verifield_core::store::{ApplyOutcome, Changeset, DatasetWrite, ReadModelCounts, ReadModelStore};

#[derive(Default)]
struct ReadModel {
    datasets: BTreeMap<u64, Dataset>,
    purchases: Vec<Purchase>,
    purchase_keys: HashSet<(String, u64)>,
    ownership: Vec<Ownership>,
    ownership_keys: HashSet<(String, u32)>,
    activity: Vec<Activity>,
    activity_keys: HashSet<(String, u32)>,
    ledger: Vec<CreditEntry>,
    ledger_keys: HashSet<(String, u32)>,
}

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    checkpoints: MemoryCheckpointStore,
    model: Mutex<ReadModel>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every call fails with a
    /// persistence error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), IndexerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IndexerError::Persistence("memory store is offline".into()));
        }
        Ok(())
    }

    fn model(&self) -> Result<MutexGuard<'_, ReadModel>, IndexerError> {
        self.check_online()?;
        self.model
            .lock()
            .map_err(|_| IndexerError::Persistence("read model lock poisoned".into()))
    }
}

impl ReadModel {
    fn apply(&mut self, changes: &Changeset) -> Result<ApplyOutcome, IndexerError> {
        // Validate first so that a rejected changeset leaves nothing behind.
        match &changes.dataset {
            DatasetWrite::SetVerified { token_id, .. } | DatasetWrite::Sale { token_id, .. }
                if !self.datasets.contains_key(token_id) =>
            {
                let event = match changes.dataset {
                    DatasetWrite::SetVerified { .. } => "Verified",
                    _ => "Purchased",
                };
                return Err(IndexerError::Consistency {
                    event: event.to_string(),
                    token_id: *token_id,
                    block_number: changes.activity.block_number,
                });
            }
            _ => {}
        }

        let mut rows = 0;

        let purchase_inserted = match &changes.purchase {
            Some(p) if self.purchase_keys.insert((p.tx_hash.clone(), p.token_id)) => {
                self.purchases.push(p.clone());
                rows += 1;
                true
            }
            _ => false,
        };

        match &changes.dataset {
            DatasetWrite::Create(ds) => {
                if !self.datasets.contains_key(&ds.token_id) {
                    self.datasets.insert(ds.token_id, ds.clone());
                    rows += 1;
                }
            }
            DatasetWrite::SetVerified { token_id, verified } => {
                if let Some(ds) = self.datasets.get_mut(token_id) {
                    if ds.verified != *verified {
                        ds.verified = *verified;
                        rows += 1;
                    }
                }
            }
            DatasetWrite::Sale { token_id, buyer } => {
                if purchase_inserted {
                    if let Some(ds) = self.datasets.get_mut(token_id) {
                        ds.buyers_count += 1;
                        ds.owner = buyer.clone();
                        rows += 1;
                    }
                }
            }
        }

        if let Some(o) = &changes.ownership {
            if self.ownership_keys.insert((o.tx_hash.clone(), o.log_index)) {
                self.ownership.push(o.clone());
                rows += 1;
            }
        }

        let a = &changes.activity;
        if self.activity_keys.insert((a.tx_hash.clone(), a.log_index)) {
            self.activity.push(a.clone());
            rows += 1;
        }

        if let Some(c) = &changes.credit {
            if self.ledger_keys.insert((c.tx_hash.clone(), c.log_index)) {
                self.ledger.push(c.clone());
                rows += 1;
            }
        }

        Ok(ApplyOutcome { rows_written: rows })
    }
}

#[async_trait]
impl ReadModelStore for MemoryStore {
    async fn apply(&self, changes: &Changeset) -> Result<ApplyOutcome, IndexerError> {
        self.model()?.apply(changes)
    }

    async fn dataset(&self, token_id: u64) -> Result<Option<Dataset>, IndexerError> {
        Ok(self.model()?.datasets.get(&token_id).cloned())
    }

    async fn recent_datasets(&self, limit: usize) -> Result<Vec<Dataset>, IndexerError> {
        let model = self.model()?;
        let mut all: Vec<Dataset> = model.datasets.values().cloned().collect();
        all.sort_by(|a, b| {
            b.minted_at_block
                .cmp(&a.minted_at_block)
                .then(b.token_id.cmp(&a.token_id))
        });
        all.truncate(limit);
        Ok(all)
    }

    async fn purchases_for(&self, token_id: u64) -> Result<Vec<Purchase>, IndexerError> {
        Ok(self
            .model()?
            .purchases
            .iter()
            .filter(|p| p.token_id == token_id)
            .cloned()
            .collect())
    }

    async fn ownership_history(&self, token_id: u64) -> Result<Vec<Ownership>, IndexerError> {
        Ok(self
            .model()?
            .ownership
            .iter()
            .filter(|o| o.token_id == token_id)
            .cloned()
            .collect())
    }

    async fn activity_for(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<Activity>, IndexerError> {
        let address = address.to_ascii_lowercase();
        Ok(self
            .model()?
            .activity
            .iter()
            .rev()
            .filter(|a| a.address == address)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ledger_for(&self, address: &str) -> Result<Vec<CreditEntry>, IndexerError> {
        let address = address.to_ascii_lowercase();
        Ok(self
            .model()?
            .ledger
            .iter()
            .filter(|c| c.address == address)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<ReadModelCounts, IndexerError> {
        let m = self.model()?;
        Ok(ReadModelCounts {
            datasets: m.datasets.len() as u64,
            purchases: m.purchases.len() as u64,
            ownership: m.ownership.len() as u64,
            activity: m.activity.len() as u64,
            ledger: m.ledger.len() as u64,
        })
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        self.check_online()?;
        self.checkpoints.load(source_id).await
    }

    async fn save_all(&self, checkpoints: &[Checkpoint]) -> Result<(), IndexerError> {
        self.check_online()?;
        self.checkpoints.save_all(checkpoints).await
    }

    async fn delete(&self, source_id: &str) -> Result<(), IndexerError> {
        self.check_online()?;
        self.checkpoints.delete(source_id).await
    }
}
