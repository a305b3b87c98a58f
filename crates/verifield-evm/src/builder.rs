//! Fluent builder API for creating indexing cycles.
//!
//! # Example
//!
//! ```rust,no_run
//! use verifield_evm::IndexerBuilder;
//!
//! # fn main() -> Result<(), verifield_core::IndexerError> {
//! let cycle = IndexerBuilder::new()
//!     .rpc_url("https://rpc.sepolia.org")
//!     .asset_contract("0x5FbDB2315678afecb367f032d93F642f64180aa3")
//!     .marketplace_contract("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512")
//!     .start_block(5_000_000)
//!     .confirmations(2)
//!     .build_http()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use verifield_core::checkpoint::{CheckpointManager, CheckpointStore};
use verifield_core::config::{FieldPlacement, IndexerConfig, VerifiedEventConfig};
use verifield_core::error::IndexerError;
use verifield_core::retry::{RetryConfig, RetryPolicy};
use verifield_core::store::ReadModelStore;
use verifield_storage::MemoryStore;

use crate::cycle::{CycleOptions, IndexingCycle};
use crate::decoder::EventDecoder;
use crate::reader::ChainReader;
use crate::rpc::{EvmRpcClient, HttpRpcClient};

const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fluent builder for [`IndexerConfig`] and [`IndexingCycle`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    store: Option<Arc<dyn ReadModelStore>>,
    guard: Option<Arc<tokio::sync::Mutex<()>>>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    pub fn asset_contract(mut self, address: impl Into<String>) -> Self {
        self.config.contracts.asset = Some(address.into());
        self
    }

    pub fn marketplace_contract(mut self, address: impl Into<String>) -> Self {
        self.config.contracts.marketplace = Some(address.into());
        self
    }

    /// Track the asset contract's `Verified` event.
    pub fn verified_event(mut self, signature: impl Into<String>, verified_in: FieldPlacement) -> Self {
        self.config.events.verified = Some(VerifiedEventConfig {
            signature: signature.into(),
            verified_in,
        });
        self
    }

    /// Set the number of blocks per `eth_getLogs` call.
    pub fn max_block_span(mut self, span: u64) -> Self {
        self.config.max_block_span = span;
        self
    }

    /// Set confirmation depth (blocks behind head before processing).
    pub fn confirmations(mut self, depth: u64) -> Self {
        self.config.confirmations = depth;
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn cycle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.cycle_timeout_ms = ms;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Use one backend for both checkpoints and the read model.
    pub fn storage<S>(mut self, storage: Arc<S>) -> Self
    where
        S: CheckpointStore + ReadModelStore + 'static,
    {
        self.checkpoints = Some(storage.clone());
        self.store = Some(storage);
        self
    }

    /// Share a single-flight guard with other cycles over the same sources.
    pub fn guard(mut self, guard: Arc<tokio::sync::Mutex<()>>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and assemble a cycle around `client`.
    ///
    /// Without explicit storage the cycle runs against a fresh [`MemoryStore`].
    pub fn build<C: EvmRpcClient>(self, client: C) -> Result<IndexingCycle<C>, IndexerError> {
        self.config.validate()?;

        let (checkpoints, store) = match (self.checkpoints, self.store) {
            (Some(c), Some(s)) => (c, s),
            _ => {
                let memory = Arc::new(MemoryStore::new());
                let checkpoints: Arc<dyn CheckpointStore> = memory.clone();
                let store: Arc<dyn ReadModelStore> = memory;
                (checkpoints, store)
            }
        };

        let config = &self.config;
        let reader = ChainReader::new(
            client,
            config.max_block_span,
            RetryPolicy::new(config.retry.clone()),
        );
        let decoder = EventDecoder::from_config(config)?;
        let checkpoints = CheckpointManager::new(checkpoints, config.sources()?);
        let options = CycleOptions {
            confirmations: config.confirmations,
            start_block: config.start_block,
            timeout: Duration::from_millis(config.cycle_timeout_ms),
        };

        Ok(IndexingCycle::new(
            reader,
            decoder,
            store,
            checkpoints,
            options,
            self.guard.unwrap_or_default(),
        ))
    }

    /// Like [`build`](Self::build), talking to `rpc_url` over HTTP.
    pub fn build_http(self) -> Result<IndexingCycle<HttpRpcClient>, IndexerError> {
        let client = HttpRpcClient::new(self.config.rpc_url.clone(), HTTP_REQUEST_TIMEOUT)?;
        self.build(client)
    }
}
