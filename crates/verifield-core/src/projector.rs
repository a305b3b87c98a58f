//! Projector: applies decoded events to the read model.
//!
//! Each event is turned into a [`Changeset`] against the current state of its
//! dataset and handed to the store, which applies it atomically with
//! insert-or-ignore semantics. Re-projecting an already applied event
//! therefore writes nothing.

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::IndexerError;
use crate::event::{merge_ordered, DomainEvent, EventKind, EventPayload};
use crate::model::{Activity, ActivityType, CreditEntry, Dataset, Ownership, Purchase};
use crate::store::{Changeset, DatasetWrite, ReadModelStore};
use crate::types::EventCounts;

/// Outcome of projecting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub kind: EventKind,
    /// `true` when every write was already present.
    pub replay: bool,
}

/// Outcome of projecting a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionReport {
    pub counts: EventCounts,
    pub replayed: u64,
}

pub struct Projector<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ReadModelStore + ?Sized> Projector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply one event.
    pub async fn apply(&self, event: &DomainEvent) -> Result<Applied, IndexerError> {
        let existing = self.store.dataset(event.token_id).await?;
        let changes = match changeset(event, existing.as_ref()) {
            Ok(c) => c,
            Err(e) => {
                if let IndexerError::Consistency { .. } = &e {
                    error!(
                        token_id = event.token_id,
                        block = event.block_number,
                        log_index = event.log_index,
                        tx = %event.tx_hash,
                        "event references an unknown token; checkpoint may be ahead of projected state"
                    );
                }
                return Err(e);
            }
        };
        let outcome = self.store.apply(&changes).await?;
        debug!(
            kind = %event.kind(),
            token_id = event.token_id,
            block = event.block_number,
            log_index = event.log_index,
            rows = outcome.rows_written,
            "event projected"
        );
        Ok(Applied {
            kind: event.kind(),
            replay: outcome.is_replay(),
        })
    }

    /// Apply a batch in `(block_number, log_index)` order.
    ///
    /// The batch is sorted before anything is applied. The first failure
    /// aborts the batch; events applied before it stay applied, which is safe
    /// because re-applying them is a no-op.
    pub async fn apply_all(
        &self,
        events: Vec<DomainEvent>,
    ) -> Result<ProjectionReport, IndexerError> {
        let ordered = merge_ordered(std::iter::once(events));
        let mut report = ProjectionReport::default();
        for event in &ordered {
            let applied = self.apply(event).await?;
            report.counts.record(applied.kind);
            if applied.replay {
                report.replayed += 1;
            }
        }
        Ok(report)
    }
}

/// Build the changeset for `event` given the current row of its dataset.
pub fn changeset(event: &DomainEvent, existing: Option<&Dataset>) -> Result<Changeset, IndexerError> {
    let activity = |address: &str, activity_type| Activity {
        address: address.to_string(),
        activity_type,
        token_id: event.token_id,
        block_number: event.block_number,
        tx_hash: event.tx_hash.clone(),
        log_index: event.log_index,
    };

    match &event.payload {
        EventPayload::Minted { owner } => Ok(Changeset {
            dataset: DatasetWrite::Create(Dataset::minted(
                event.token_id,
                owner.clone(),
                event.block_number,
            )),
            purchase: None,
            ownership: Some(Ownership {
                address: owner.clone(),
                token_id: event.token_id,
                acquired_at_block: event.block_number,
                tx_hash: event.tx_hash.clone(),
                log_index: event.log_index,
            }),
            activity: activity(owner, ActivityType::Mint),
            credit: None,
        }),

        EventPayload::Verified { verified } => {
            let dataset = existing.ok_or_else(|| unknown_token(event))?;
            Ok(Changeset {
                dataset: DatasetWrite::SetVerified {
                    token_id: event.token_id,
                    verified: *verified,
                },
                purchase: None,
                ownership: None,
                activity: activity(&dataset.owner, ActivityType::Verify),
                credit: None,
            })
        }

        EventPayload::Purchased { buyer, amount } => {
            let dataset = existing.ok_or_else(|| unknown_token(event))?;
            Ok(Changeset {
                dataset: DatasetWrite::Sale {
                    token_id: event.token_id,
                    buyer: buyer.clone(),
                },
                purchase: Some(Purchase {
                    token_id: event.token_id,
                    buyer: buyer.clone(),
                    amount: *amount,
                    tx_hash: event.tx_hash.clone(),
                    block_number: event.block_number,
                }),
                ownership: Some(Ownership {
                    address: buyer.clone(),
                    token_id: event.token_id,
                    acquired_at_block: event.block_number,
                    tx_hash: event.tx_hash.clone(),
                    log_index: event.log_index,
                }),
                activity: activity(buyer, ActivityType::Purchase),
                // The seller is whoever owned the token before this sale.
                credit: Some(CreditEntry {
                    address: dataset.owner.clone(),
                    delta: *amount,
                    reason: format!("Sale of token #{}", event.token_id),
                    tx_hash: event.tx_hash.clone(),
                    log_index: event.log_index,
                }),
            })
        }
    }
}

fn unknown_token(event: &DomainEvent) -> IndexerError {
    IndexerError::Consistency {
        event: event.kind().to_string(),
        token_id: event.token_id,
        block_number: event.block_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn event(block: u64, log: u32, payload: EventPayload) -> DomainEvent {
        DomainEvent {
            token_id: 1,
            block_number: block,
            log_index: log,
            tx_hash: format!("0xtx{block}"),
            payload,
        }
    }

    #[test]
    fn mint_creates_dataset_ownership_and_activity() {
        let ev = event(10, 0, EventPayload::Minted { owner: "0xa".into() });
        let cs = changeset(&ev, None).unwrap();
        match &cs.dataset {
            DatasetWrite::Create(ds) => {
                assert_eq!(ds.owner, "0xa");
                assert_eq!(ds.minted_at_block, 10);
            }
            other => panic!("unexpected dataset write: {other:?}"),
        }
        assert_eq!(cs.ownership.as_ref().unwrap().address, "0xa");
        assert_eq!(cs.activity.activity_type, ActivityType::Mint);
        assert!(cs.purchase.is_none() && cs.credit.is_none());
    }

    #[test]
    fn purchase_credits_previous_owner() {
        let ds = Dataset::minted(1, "0xa", 10);
        let ev = event(
            50,
            3,
            EventPayload::Purchased {
                buyer: "0xb".into(),
                amount: U256::from(500u64),
            },
        );
        let cs = changeset(&ev, Some(&ds)).unwrap();
        let credit = cs.credit.unwrap();
        assert_eq!(credit.address, "0xa");
        assert_eq!(credit.delta, U256::from(500u64));
        assert_eq!(credit.source_event_key(), "0xtx50:3");
        assert_eq!(cs.activity.address, "0xb");
        assert_eq!(
            cs.dataset,
            DatasetWrite::Sale { token_id: 1, buyer: "0xb".into() }
        );
    }

    #[test]
    fn purchase_of_unknown_token_is_a_consistency_error() {
        let ev = event(
            50,
            0,
            EventPayload::Purchased {
                buyer: "0xb".into(),
                amount: U256::from(1u64),
            },
        );
        let err = changeset(&ev, None).unwrap_err();
        assert!(matches!(err, IndexerError::Consistency { token_id: 1, .. }));
    }

    #[test]
    fn verify_activity_is_attributed_to_owner() {
        let ds = Dataset::minted(1, "0xa", 10);
        let ev = event(20, 1, EventPayload::Verified { verified: true });
        let cs = changeset(&ev, Some(&ds)).unwrap();
        assert_eq!(cs.activity.address, "0xa");
        assert_eq!(cs.activity.activity_type, ActivityType::Verify);
    }
}
