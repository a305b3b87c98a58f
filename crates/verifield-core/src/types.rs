//! Trigger-boundary result types.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, IndexerError};
use crate::event::EventKind;

// ─── EventCounts ──────────────────────────────────────────────────────────────

/// Number of events applied per kind during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub minted: u64,
    pub verified: u64,
    pub purchased: u64,
}

impl EventCounts {
    pub fn record(&mut self, kind: EventKind) {
        match kind {
            EventKind::Minted => self.minted += 1,
            EventKind::Verified => self.verified += 1,
            EventKind::Purchased => self.purchased += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.minted + self.verified + self.purchased
    }
}

// ─── CycleSummary ─────────────────────────────────────────────────────────────

/// Successful result of one indexing cycle.
///
/// `from_block..=to_block` is the range that was projected and `to_block` is
/// the new checkpoint. A cycle that found nothing to do reports an empty
/// range at the current checkpoint (`from_block == to_block == checkpoint`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub events_processed: EventCounts,
    pub from_block: u64,
    pub to_block: u64,
}

impl CycleSummary {
    pub fn caught_up(checkpoint: u64) -> Self {
        Self {
            events_processed: EventCounts::default(),
            from_block: checkpoint,
            to_block: checkpoint,
        }
    }
}

// ─── CycleFailure ─────────────────────────────────────────────────────────────

/// Error payload of a failed cycle: the taxonomy kind and the attempted range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl CycleFailure {
    pub fn new(err: &IndexerError, from_block: Option<u64>, to_block: Option<u64>) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            from_block,
            to_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_serializes_camel_case() {
        let mut counts = EventCounts::default();
        counts.record(EventKind::Minted);
        let summary = CycleSummary {
            events_processed: counts,
            from_block: 1,
            to_block: 100,
        };
        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["eventsProcessed"]["minted"], 1);
        assert_eq!(v["eventsProcessed"]["purchased"], 0);
        assert_eq!(v["fromBlock"], 1);
        assert_eq!(v["toBlock"], 100);
    }

    #[test]
    fn failure_carries_kind_and_range() {
        let err = IndexerError::ChainUnavailable("connection refused".into());
        let failure = CycleFailure::new(&err, Some(101), Some(200));
        let v = serde_json::to_value(&failure).unwrap();
        assert_eq!(v["kind"], "ChainUnavailable");
        assert_eq!(v["fromBlock"], 101);
        assert_eq!(v["toBlock"], 200);
    }
}
