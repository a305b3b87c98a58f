//! Raw log → [`DomainEvent`] decoding.
//!
//! Each tracked event is bound to one contract and one topic hash. A log is
//! matched on `topics[0]`; logs with an unknown topic are dropped, logs with
//! a known topic must decode or the cycle fails.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use tiny_keccak::{Hasher, Keccak};
use tracing::warn;

use verifield_core::config::{FieldPlacement, IndexerConfig};
use verifield_core::error::IndexerError;
use verifield_core::event::{DomainEvent, EventKind, EventPayload};

use crate::rpc::RawLog;

pub const MINTED_SIGNATURE: &str = "Minted(uint256,address)";
pub const PURCHASED_SIGNATURE: &str = "Purchased(uint256,address,uint256)";

/// keccak256 of a canonical event signature, as `0x`-prefixed lowercase hex.
pub fn keccak256_signature(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

/// One tracked event: which contract emits it and how it is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub kind: EventKind,
    pub signature: String,
    pub topic0: String,
    /// Lowercase address of the emitting contract.
    pub contract: String,
    /// Only meaningful for `Verified`.
    pub verified_in: FieldPlacement,
}

impl EventSpec {
    pub fn new(kind: EventKind, signature: &str, contract: &str) -> Self {
        Self {
            kind,
            signature: signature.to_string(),
            topic0: keccak256_signature(signature),
            contract: contract.to_ascii_lowercase(),
            verified_in: FieldPlacement::Topic,
        }
    }
}

/// Decodes raw logs of the tracked events.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    specs: Vec<EventSpec>,
}

impl EventDecoder {
    pub fn new(specs: Vec<EventSpec>) -> Self {
        Self { specs }
    }

    /// `Minted` and `Purchased`, plus `Verified` when the config declares it.
    pub fn from_config(config: &IndexerConfig) -> Result<Self, IndexerError> {
        let asset = config.asset_contract()?;
        let marketplace = config.marketplace_contract()?;
        let mut specs = vec![
            EventSpec::new(EventKind::Minted, MINTED_SIGNATURE, &asset),
            EventSpec::new(EventKind::Purchased, PURCHASED_SIGNATURE, &marketplace),
        ];
        if let Some(verified) = &config.events.verified {
            let mut spec = EventSpec::new(EventKind::Verified, &verified.signature, &asset);
            spec.verified_in = verified.verified_in;
            specs.push(spec);
        }
        Ok(Self { specs })
    }

    /// The tracked events, one `eth_getLogs` query each.
    pub fn specs(&self) -> &[EventSpec] {
        &self.specs
    }

    /// Decode one log.
    ///
    /// Returns `Ok(None)` for logs that are not ours: unknown topic, wrong
    /// emitter, or flagged `removed`. Returns a decode error when a log
    /// carries a tracked topic but does not match its layout.
    pub fn decode(&self, log: &RawLog) -> Result<Option<DomainEvent>, IndexerError> {
        let Some(topic0) = log.topic0() else {
            warn!(tx = %log.tx_hash, "log without topics dropped");
            return Ok(None);
        };
        let Some(spec) = self.specs.iter().find(|s| s.topic0 == topic0) else {
            warn!(tx = %log.tx_hash, topic0 = %topic0, "unknown event signature, log dropped");
            return Ok(None);
        };
        if log.is_removed() {
            warn!(tx = %log.tx_hash, event = %spec.kind, "removed log skipped");
            return Ok(None);
        }
        if !log.address.eq_ignore_ascii_case(&spec.contract) {
            warn!(
                tx = %log.tx_hash,
                event = %spec.kind,
                emitter = %log.address,
                expected = %spec.contract,
                "log from unexpected contract dropped"
            );
            return Ok(None);
        }

        let fail = |reason: String| IndexerError::Decode {
            signature: spec.signature.clone(),
            tx_hash: log.tx_hash.clone(),
            reason,
        };

        let block_number = log.block_number_u64()?;
        let log_index = log.log_index_u32()?;
        let topic = |i: usize, ty: DynSolType| -> Result<DynSolValue, IndexerError> {
            let raw = log
                .topics
                .get(i)
                .ok_or_else(|| fail(format!("missing topic {i}")))?;
            let bytes = decode_hex(raw).map_err(fail)?;
            ty.abi_decode(&bytes)
                .map_err(|e| fail(format!("topic {i} decode: {e}")))
        };
        let data = |types: Vec<DynSolType>| -> Result<Vec<DynSolValue>, IndexerError> {
            let bytes = decode_hex(&log.data).map_err(fail)?;
            match DynSolType::Tuple(types)
                .abi_decode(&bytes)
                .map_err(|e| fail(format!("data decode: {e}")))?
            {
                DynSolValue::Tuple(values) => Ok(values),
                other => Ok(vec![other]),
            }
        };

        let token_id = token_id(topic(1, DynSolType::Uint(256))?).map_err(fail)?;
        let payload = match spec.kind {
            EventKind::Minted => EventPayload::Minted {
                owner: address(topic(2, DynSolType::Address)?).map_err(fail)?,
            },
            EventKind::Purchased => {
                let buyer = address(topic(2, DynSolType::Address)?).map_err(fail)?;
                let amount = data(vec![DynSolType::Uint(256)])?
                    .into_iter()
                    .next()
                    .ok_or_else(|| fail("missing amount".into()))?;
                EventPayload::Purchased {
                    buyer,
                    amount: uint(amount).map_err(fail)?,
                }
            }
            EventKind::Verified => {
                let value = match spec.verified_in {
                    FieldPlacement::Topic => topic(2, DynSolType::Bool)?,
                    FieldPlacement::Data => data(vec![DynSolType::Bool])?
                        .into_iter()
                        .next()
                        .ok_or_else(|| fail("missing verified flag".into()))?,
                };
                EventPayload::Verified {
                    verified: boolean(value).map_err(fail)?,
                }
            }
        };

        Ok(Some(DomainEvent {
            token_id,
            block_number,
            log_index,
            tx_hash: log.tx_hash.to_ascii_lowercase(),
            payload,
        }))
    }
}

// ─── Decoded value helpers ───────────────────────────────────────────────────

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| format!("bad hex {s:?}: {e}"))
}

fn uint(value: DynSolValue) -> Result<U256, String> {
    match value {
        DynSolValue::Uint(v, _) => Ok(v),
        other => Err(format!("expected uint256, got {other:?}")),
    }
}

/// Token ids are stored as signed 64-bit integers.
fn token_id(value: DynSolValue) -> Result<u64, String> {
    let value = uint(value)?;
    if value > U256::from(i64::MAX as u64) {
        return Err(format!("token id {value} does not fit in 63 bits"));
    }
    Ok(value.as_limbs()[0])
}

fn address(value: DynSolValue) -> Result<String, String> {
    match value {
        DynSolValue::Address(a) => Ok(format!("0x{}", hex::encode(a.as_slice()))),
        other => Err(format!("expected address, got {other:?}")),
    }
}

fn boolean(value: DynSolValue) -> Result<bool, String> {
    match value {
        DynSolValue::Bool(b) => Ok(b),
        other => Err(format!("expected bool, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifield_core::config::VerifiedEventConfig;

    const ASSET: &str = "0x00000000000000000000000000000000000000aa";
    const MARKET: &str = "0x00000000000000000000000000000000000000bb";

    fn word(v: u64) -> String {
        format!("0x{v:064x}")
    }

    fn addr_word(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn log(address: &str, topics: Vec<String>, data: String) -> RawLog {
        RawLog {
            address: address.into(),
            topics,
            data,
            block_number: "0xa".into(),
            tx_hash: "0xABC".into(),
            log_index: "0x2".into(),
            removed: None,
        }
    }

    fn decoder(verified: Option<FieldPlacement>) -> EventDecoder {
        let mut config = IndexerConfig::default();
        config.contracts.asset = Some(ASSET.into());
        config.contracts.marketplace = Some(MARKET.into());
        config.events.verified = verified.map(|verified_in| VerifiedEventConfig {
            signature: "Verified(uint256,bool)".into(),
            verified_in,
        });
        EventDecoder::from_config(&config).unwrap()
    }

    #[test]
    fn erc20_transfer_topic() {
        assert_eq!(
            keccak256_signature("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn decodes_minted() {
        let owner = "0x000000000000000000000000000000000000000a";
        let raw = log(
            ASSET,
            vec![keccak256_signature(MINTED_SIGNATURE), word(1), addr_word(owner)],
            "0x".into(),
        );
        let ev = decoder(None).decode(&raw).unwrap().unwrap();
        assert_eq!(ev.token_id, 1);
        assert_eq!(ev.block_number, 10);
        assert_eq!(ev.log_index, 2);
        assert_eq!(ev.tx_hash, "0xabc");
        assert_eq!(ev.payload, EventPayload::Minted { owner: owner.into() });
    }

    #[test]
    fn decodes_purchased_amount_from_data() {
        let buyer = "0x000000000000000000000000000000000000000b";
        let raw = log(
            MARKET,
            vec![keccak256_signature(PURCHASED_SIGNATURE), word(1), addr_word(buyer)],
            word(500),
        );
        let ev = decoder(None).decode(&raw).unwrap().unwrap();
        assert_eq!(
            ev.payload,
            EventPayload::Purchased { buyer: buyer.into(), amount: U256::from(500u64) }
        );
    }

    #[test]
    fn verified_only_when_configured() {
        let topic0 = keccak256_signature("Verified(uint256,bool)");
        let raw = log(ASSET, vec![topic0.clone(), word(1), word(1)], "0x".into());
        assert!(decoder(None).decode(&raw).unwrap().is_none());

        let ev = decoder(Some(FieldPlacement::Topic)).decode(&raw).unwrap().unwrap();
        assert_eq!(ev.payload, EventPayload::Verified { verified: true });

        let raw = log(ASSET, vec![topic0, word(1)], word(0));
        let ev = decoder(Some(FieldPlacement::Data)).decode(&raw).unwrap().unwrap();
        assert_eq!(ev.payload, EventPayload::Verified { verified: false });
    }

    #[test]
    fn unknown_topic_is_dropped() {
        let raw = log(ASSET, vec![keccak256_signature("Approval(address,address,uint256)")], "0x".into());
        assert!(decoder(None).decode(&raw).unwrap().is_none());
    }

    #[test]
    fn wrong_emitter_and_removed_are_dropped() {
        let topics = vec![keccak256_signature(MINTED_SIGNATURE), word(1), word(10)];
        let raw = log(MARKET, topics.clone(), "0x".into());
        assert!(decoder(None).decode(&raw).unwrap().is_none());

        let mut raw = log(ASSET, topics, "0x".into());
        raw.removed = Some(true);
        assert!(decoder(None).decode(&raw).unwrap().is_none());
    }

    #[test]
    fn malformed_known_log_is_a_decode_error() {
        // Purchased with no data word for the amount.
        let raw = log(
            MARKET,
            vec![keccak256_signature(PURCHASED_SIGNATURE), word(1), word(11)],
            "0x".into(),
        );
        let err = decoder(None).decode(&raw).unwrap_err();
        assert!(matches!(err, IndexerError::Decode { .. }));

        // Missing owner topic.
        let raw = log(ASSET, vec![keccak256_signature(MINTED_SIGNATURE), word(1)], "0x".into());
        assert!(matches!(decoder(None).decode(&raw), Err(IndexerError::Decode { .. })));
    }

    #[test]
    fn token_id_above_i64_range_is_a_decode_error() {
        let raw = log(
            ASSET,
            vec![keccak256_signature(MINTED_SIGNATURE), word(i64::MAX as u64 + 1), word(10)],
            "0x".into(),
        );
        assert!(matches!(decoder(None).decode(&raw), Err(IndexerError::Decode { .. })));

        let raw = log(
            ASSET,
            vec![keccak256_signature(MINTED_SIGNATURE), word(i64::MAX as u64), word(10)],
            "0x".into(),
        );
        assert_eq!(decoder(None).decode(&raw).unwrap().unwrap().token_id, i64::MAX as u64);
    }

    #[test]
    fn short_topic_is_a_decode_error() {
        let raw = log(
            ASSET,
            vec![keccak256_signature(MINTED_SIGNATURE), "0x01".into(), word(10)],
            "0x".into(),
        );
        assert!(matches!(decoder(None).decode(&raw), Err(IndexerError::Decode { .. })));
    }

    #[test]
    fn oversized_token_id_is_a_decode_error() {
        let huge = format!("0x{}", "f".repeat(64));
        let raw = log(
            ASSET,
            vec![keccak256_signature(MINTED_SIGNATURE), huge, word(10)],
            "0x".into(),
        );
        assert!(matches!(decoder(None).decode(&raw), Err(IndexerError::Decode { .. })));
    }
}
