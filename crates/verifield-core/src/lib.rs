//! verifield-core: domain model and projection engine for the VeriField indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexingCycle (verifield-evm)
//!     ├── CheckpointManager (last fully projected block per source)
//!     ├── ChainReader       (chunked eth_getLogs, retry)
//!     ├── EventDecoder      (raw log → DomainEvent)
//!     ├── Projector         (DomainEvent → Changeset → ReadModelStore)
//!     └── Storage backend   (memory / SQLite)
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod projector;
pub mod retry;
pub mod store;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{FieldPlacement, IndexerConfig, VerifiedEventConfig, MAX_BLOCK_SPAN};
pub use error::{ErrorKind, IndexerError};
pub use event::{DomainEvent, EventKey, EventKind, EventPayload};
pub use model::{Activity, ActivityType, CreditEntry, Dataset, Ownership, Purchase};
pub use projector::{Applied, ProjectionReport, Projector};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{ApplyOutcome, Changeset, DatasetWrite, ReadModelCounts, ReadModelStore};
pub use types::{CycleFailure, CycleSummary, EventCounts};
