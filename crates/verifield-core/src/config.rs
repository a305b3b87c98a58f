//! Indexer configuration: TOML file, environment overrides, startup validation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::retry::RetryConfig;

/// Provider-imposed ceiling on the block span of one `eth_getLogs` call.
pub const MAX_BLOCK_SPAN: u64 = 2_000;

/// Environment variables that override file values.
pub const ENV_RPC_URL: &str = "VERIFIELD_RPC_URL";
pub const ENV_ASSET_CONTRACT: &str = "VERIFIELD_ASSET_CONTRACT";
pub const ENV_MARKETPLACE_CONTRACT: &str = "VERIFIELD_MARKETPLACE_CONTRACT";
pub const ENV_DATABASE_URL: &str = "VERIFIELD_DATABASE_URL";

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Name of this indexer, used in logs.
    #[serde(default = "default_id")]
    pub id: String,
    /// JSON-RPC endpoint of the chain.
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    /// Maximum blocks per `eth_getLogs` call, at most [`MAX_BLOCK_SPAN`].
    #[serde(default = "default_max_block_span")]
    pub max_block_span: u64,
    /// Blocks to stay behind the chain head. `0` treats every block as final.
    #[serde(default)]
    pub confirmations: u64,
    /// First block worth scanning (contract deployment block).
    #[serde(default)]
    pub start_block: u64,
    /// Wall-clock budget of one cycle's fetch and projection phases.
    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Interval between cycles in `watch` mode.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub log: LogConfig,
}

/// Tracked contract addresses. Both are required; they are optional here so
/// that a missing one is reported by [`IndexerConfig::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Dataset NFT contract (emits `Minted`, and `Verified` when configured).
    pub asset: Option<String>,
    /// Marketplace contract (emits `Purchased`).
    pub marketplace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// The `Verified` event is only indexed when declared here.
    pub verified: Option<VerifiedEventConfig>,
}

/// Declared shape of the asset contract's `Verified(uint256,bool)` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedEventConfig {
    /// Canonical signature, e.g. `"Verified(uint256,bool)"`.
    pub signature: String,
    /// Where the `verified` flag is encoded.
    pub verified_in: FieldPlacement,
}

/// Placement of an event argument within a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldPlacement {
    /// Indexed: `topics[2]`.
    Topic,
    /// Not indexed: first word of `data`.
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global level or full `EnvFilter` directive string.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON structured logs instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_id() -> String { "verifield".into() }
fn default_max_block_span() -> u64 { MAX_BLOCK_SPAN }
fn default_cycle_timeout_ms() -> u64 { 60_000 }
fn default_poll_interval_ms() -> u64 { 10_000 }
fn default_database_url() -> String { "sqlite:verifield.db?mode=rwc".into() }
fn default_log_level() -> String { "info".into() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            rpc_url: String::new(),
            contracts: ContractsConfig::default(),
            events: EventsConfig::default(),
            max_block_span: default_max_block_span(),
            confirmations: 0,
            start_block: 0,
            cycle_timeout_ms: default_cycle_timeout_ms(),
            retry: RetryConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            database_url: default_database_url(),
            log: LogConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Parse a TOML document. Does not validate.
    pub fn from_toml_str(s: &str) -> Result<Self, IndexerError> {
        toml::from_str(s).map_err(|e| IndexerError::Config(format!("invalid TOML: {e}")))
    }

    /// Load a TOML file. Does not validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Override file values with the `VERIFIELD_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override file values from a variable lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_RPC_URL) {
            self.rpc_url = v;
        }
        if let Some(v) = get(ENV_ASSET_CONTRACT) {
            self.contracts.asset = Some(v);
        }
        if let Some(v) = get(ENV_MARKETPLACE_CONTRACT) {
            self.contracts.marketplace = Some(v);
        }
        if let Some(v) = get(ENV_DATABASE_URL) {
            self.database_url = v;
        }
    }

    /// Check everything a cycle relies on. Run once at startup.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.rpc_url.trim().is_empty() {
            return Err(IndexerError::Config("rpc_url is required".into()));
        }
        self.asset_contract()?;
        self.marketplace_contract()?;
        if self.max_block_span == 0 || self.max_block_span > MAX_BLOCK_SPAN {
            return Err(IndexerError::Config(format!(
                "max_block_span must be within 1..={MAX_BLOCK_SPAN}, got {}",
                self.max_block_span
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(IndexerError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.cycle_timeout_ms == 0 {
            return Err(IndexerError::Config("cycle_timeout_ms must be positive".into()));
        }
        if let Some(verified) = &self.events.verified {
            let params = signature_params(&verified.signature).ok_or_else(|| {
                IndexerError::Config(format!(
                    "events.verified.signature is not a canonical signature: {:?}",
                    verified.signature
                ))
            })?;
            if params != ["uint256", "bool"] {
                return Err(IndexerError::Config(format!(
                    "events.verified.signature must take (uint256,bool), got ({})",
                    params.join(",")
                )));
            }
        }
        Ok(())
    }

    /// Lowercase address of the asset contract.
    pub fn asset_contract(&self) -> Result<String, IndexerError> {
        required_address("contracts.asset", self.contracts.asset.as_deref())
    }

    /// Lowercase address of the marketplace contract.
    pub fn marketplace_contract(&self) -> Result<String, IndexerError> {
        required_address("contracts.marketplace", self.contracts.marketplace.as_deref())
    }

    /// Checkpoint sources of this indexer: both tracked contracts.
    pub fn sources(&self) -> Result<Vec<String>, IndexerError> {
        let mut sources = vec![self.asset_contract()?, self.marketplace_contract()?];
        sources.dedup();
        Ok(sources)
    }
}

fn required_address(field: &str, value: Option<&str>) -> Result<String, IndexerError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IndexerError::Config(format!("{field} is required")))?;
    if !is_address(value) {
        return Err(IndexerError::Config(format!(
            "{field} is not a 20-byte hex address: {value}"
        )));
    }
    Ok(value.to_ascii_lowercase())
}

/// Returns `true` for `0x` followed by 40 hex digits.
pub fn is_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .map(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Parameter types of a canonical signature such as `Name(uint256,bool)`.
pub fn signature_params(signature: &str) -> Option<Vec<&str>> {
    let open = signature.find('(')?;
    let inner = signature.strip_suffix(')')?.get(open + 1..)?;
    let name = &signature[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    if inner.is_empty() {
        return Some(vec![]);
    }
    let params: Vec<&str> = inner.split(',').collect();
    if params.iter().any(|p| p.is_empty() || p.contains(' ')) {
        return None;
    }
    Some(params)
}
