//! verifield-evm: chain access and the indexing cycle.
//!
//! [`ChainReader`] fetches logs in bounded, retried chunks, [`EventDecoder`]
//! turns them into domain events and [`IndexingCycle`] ties both to the
//! projector and the checkpoint store.

pub mod builder;
pub mod cycle;
pub mod decoder;
pub mod reader;
pub mod rpc;

pub use builder::IndexerBuilder;
pub use cycle::{CycleOptions, CycleState, IndexingCycle};
pub use decoder::{keccak256_signature, EventDecoder, EventSpec};
pub use reader::ChainReader;
pub use rpc::{EvmRpcClient, HttpRpcClient, LogFilter, RawLog};
