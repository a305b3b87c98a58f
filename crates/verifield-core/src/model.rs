//! Read-model rows derived from projected events.
//!
//! Nothing here is hand-edited: every row is produced by the projector from a
//! chain log, and every append-only row carries the `(tx_hash, log_index)` of
//! the log that produced it so that replays can be ignored.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

// ─── Dataset ──────────────────────────────────────────────────────────────────

/// A minted dataset token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub token_id: u64,
    pub owner: String,
    pub name: String,
    pub domain: String,
    pub tags: Vec<String>,
    pub cid: String,
    pub license_uri: String,
    pub sha256sum: String,
    pub verified: bool,
    pub buyers_count: u64,
    /// Block of the `Minted` log that created the row.
    pub minted_at_block: u64,
}

impl Dataset {
    /// A freshly minted dataset. The `Minted` log carries no metadata, so the
    /// descriptive fields start as placeholders.
    pub fn minted(token_id: u64, owner: impl Into<String>, block_number: u64) -> Self {
        Self {
            token_id,
            owner: owner.into(),
            name: format!("Dataset #{token_id}"),
            domain: String::new(),
            tags: vec![],
            cid: String::new(),
            license_uri: String::new(),
            sha256sum: String::new(),
            verified: false,
            buyers_count: 0,
            minted_at_block: block_number,
        }
    }
}

// ─── Append-only rows ─────────────────────────────────────────────────────────

/// One row per `Purchased` log, unique on `(tx_hash, token_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub token_id: u64,
    pub buyer: String,
    pub amount: U256,
    pub tx_hash: String,
    pub block_number: u64,
}

/// Ownership history entry, one per mint or purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ownership {
    pub address: String,
    pub token_id: u64,
    pub acquired_at_block: u64,
    pub tx_hash: String,
    pub log_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Mint,
    Verify,
    Purchase,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Verify => "verify",
            Self::Purchase => "purchase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mint" => Some(Self::Mint),
            "verify" => Some(Self::Verify),
            "purchase" => Some(Self::Purchase),
            _ => None,
        }
    }
}

/// Activity feed entry for UI display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub address: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub token_id: u64,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
}

/// Credit ledger entry, exactly one per triggering `Purchased` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditEntry {
    pub address: String,
    pub delta: U256,
    pub reason: String,
    pub tx_hash: String,
    pub log_index: u32,
}

impl CreditEntry {
    /// The `sourceEventKey` of the entry: `<tx_hash>:<log_index>`.
    pub fn source_event_key(&self) -> String {
        format!("{}:{}", self.tx_hash, self.log_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_dataset_starts_unverified_with_no_buyers() {
        let ds = Dataset::minted(1, "0xa", 10);
        assert_eq!(ds.name, "Dataset #1");
        assert!(!ds.verified);
        assert_eq!(ds.buyers_count, 0);
        assert_eq!(ds.minted_at_block, 10);
    }

    #[test]
    fn activity_type_round_trips_through_str() {
        for t in [ActivityType::Mint, ActivityType::Verify, ActivityType::Purchase] {
            assert_eq!(ActivityType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ActivityType::parse("burn"), None);
    }
}
