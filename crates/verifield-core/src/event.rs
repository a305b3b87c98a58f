//! Decoded domain events and their canonical application order.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// The three contract events the indexer projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Minted,
    Verified,
    Purchased,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minted => write!(f, "Minted"),
            Self::Verified => write!(f, "Verified"),
            Self::Purchased => write!(f, "Purchased"),
        }
    }
}

/// Ordering key of a log on chain: `(block_number, log_index)` ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub block_number: u64,
    pub log_index: u32,
}

/// Kind-specific event arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    Minted { owner: String },
    Verified { verified: bool },
    Purchased { buyer: String, amount: U256 },
}

/// A decoded event with its on-chain origin preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub token_id: u64,
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: String,
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Minted { .. } => EventKind::Minted,
            EventPayload::Verified { .. } => EventKind::Verified,
            EventPayload::Purchased { .. } => EventKind::Purchased,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

/// Merge per-signature event streams into one stream in `(block, logIndex)` order.
///
/// The streams may arrive in any order and need not be sorted. Two events
/// with the same key are the same log fetched twice; only the first is kept.
pub fn merge_ordered<I>(streams: I) -> Vec<DomainEvent>
where
    I: IntoIterator<Item = Vec<DomainEvent>>,
{
    let mut merged: Vec<DomainEvent> = streams.into_iter().flatten().collect();
    merged.sort_by_key(DomainEvent::key);
    merged.dedup_by_key(|e| e.key());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(block: u64, log: u32, payload: EventPayload) -> DomainEvent {
        DomainEvent {
            token_id: 1,
            block_number: block,
            log_index: log,
            tx_hash: format!("0x{block:x}{log:x}"),
            payload,
        }
    }

    fn minted() -> EventPayload {
        EventPayload::Minted { owner: "0xa".into() }
    }

    fn purchased() -> EventPayload {
        EventPayload::Purchased {
            buyer: "0xb".into(),
            amount: U256::from(500u64),
        }
    }

    #[test]
    fn key_orders_by_block_then_log_index() {
        let a = EventKey { block_number: 10, log_index: 9 };
        let b = EventKey { block_number: 11, log_index: 0 };
        let c = EventKey { block_number: 11, log_index: 3 };
        assert!(a < b && b < c);
    }

    #[test]
    fn merge_interleaves_streams_fetched_separately() {
        // Purchases fetched first must not be applied before the mint in the same block.
        let purchases = vec![ev(10, 4, purchased()), ev(12, 0, purchased())];
        let mints = vec![ev(10, 1, minted()), ev(11, 2, minted())];
        let merged = merge_ordered(vec![purchases, mints]);
        let keys: Vec<_> = merged.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(keys, vec![(10, 1), (10, 4), (11, 2), (12, 0)]);
        assert_eq!(merged[0].kind(), EventKind::Minted);
        assert_eq!(merged[1].kind(), EventKind::Purchased);
    }

    #[test]
    fn merge_drops_duplicate_logs() {
        let merged = merge_ordered(vec![vec![ev(5, 0, minted())], vec![ev(5, 0, minted())]]);
        assert_eq!(merged.len(), 1);
    }
}
