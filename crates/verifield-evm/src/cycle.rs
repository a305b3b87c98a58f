//! The indexing cycle: one bounded catch-up run from checkpoint to head.
//!
//! ```text
//! Idle ──▶ Fetching ──▶ Projecting ──▶ Committing ──▶ Idle
//!   └──────────┴─────────────┴──────────────┴──▶ Failed ──▶ Idle
//! ```
//!
//! The checkpoint is the last thing written. Any failure before it leaves
//! the checkpoint where it was, and the next cycle re-reads the same range;
//! projection is idempotent, so events applied by the failed attempt are
//! no-ops the second time.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, error, info};

use verifield_core::checkpoint::CheckpointManager;
use verifield_core::error::IndexerError;
use verifield_core::event::{merge_ordered, DomainEvent};
use verifield_core::projector::{ProjectionReport, Projector};
use verifield_core::store::ReadModelStore;
use verifield_core::types::{CycleFailure, CycleSummary};

use crate::decoder::{EventDecoder, EventSpec};
use crate::reader::ChainReader;
use crate::rpc::EvmRpcClient;

/// Where the cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Projecting,
    Committing,
    /// The last run failed. Cleared when the next run starts.
    Failed,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Projecting => "projecting",
            Self::Committing => "committing",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Cycle tuning that does not belong to any one collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOptions {
    /// Blocks behind head considered final.
    pub confirmations: u64,
    /// First block worth reading on a fresh deployment.
    pub start_block: u64,
    /// Wall-clock budget for fetching and projecting.
    pub timeout: Duration,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            confirmations: 0,
            start_block: 0,
            timeout: Duration::from_secs(60),
        }
    }
}

enum Progress {
    CaughtUp(u64),
    Projected {
        from: u64,
        to: u64,
        report: ProjectionReport,
    },
}

/// Runs indexing cycles for one group of sources.
pub struct IndexingCycle<C> {
    reader: ChainReader<C>,
    decoder: EventDecoder,
    projector: Projector<dyn ReadModelStore>,
    checkpoints: CheckpointManager,
    options: CycleOptions,
    guard: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<CycleState>,
}

impl<C: EvmRpcClient> IndexingCycle<C> {
    pub fn new(
        reader: ChainReader<C>,
        decoder: EventDecoder,
        store: Arc<dyn ReadModelStore>,
        checkpoints: CheckpointManager,
        options: CycleOptions,
        guard: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        Self {
            reader,
            decoder,
            projector: Projector::new(store),
            checkpoints,
            options,
            guard,
            state: Mutex::new(CycleState::Idle),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state.lock().map(|s| *s).unwrap_or(CycleState::Failed)
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn store(&self) -> &Arc<dyn ReadModelStore> {
        self.projector.store()
    }

    pub fn reader(&self) -> &ChainReader<C> {
        &self.reader
    }

    fn set_state(&self, next: CycleState) {
        if let Ok(mut s) = self.state.lock() {
            debug!(from = %*s, to = %next, "cycle state");
            *s = next;
        }
    }

    /// Run one cycle.
    ///
    /// Rejected with `CycleInProgress` while another cycle sharing this
    /// cycle's guard is running. Safe to call repeatedly: once caught up it
    /// returns an empty summary.
    pub async fn run_once(&self) -> Result<CycleSummary, CycleFailure> {
        let Ok(_flight) = self.guard.try_lock() else {
            let err = IndexerError::CycleInProgress {
                sources: self.checkpoints.sources().join(","),
            };
            info!("{err}; trigger rejected");
            return Err(CycleFailure::new(&err, None, None));
        };

        self.set_state(CycleState::Idle);
        let mut range = None;
        match self.execute(&mut range).await {
            Ok(summary) => {
                self.set_state(CycleState::Idle);
                Ok(summary)
            }
            Err(e) => {
                self.set_state(CycleState::Failed);
                let (from, to) = range.map_or((None, None), |(f, t)| (Some(f), Some(t)));
                let failure = CycleFailure::new(&e, from, to);
                error!(
                    kind = %failure.kind,
                    from = ?from,
                    to = ?to,
                    error = %e,
                    "cycle failed; checkpoint not advanced"
                );
                Err(failure)
            }
        }
    }

    async fn execute(&self, range: &mut Option<(u64, u64)>) -> Result<CycleSummary, IndexerError> {
        let budget = self.options.timeout;
        let progress = tokio::time::timeout(budget, self.project_range(range))
            .await
            .map_err(|_| IndexerError::Timeout {
                ms: budget.as_millis() as u64,
            })??;
        let (from, to, report) = match progress {
            Progress::CaughtUp(checkpoint) => return Ok(CycleSummary::caught_up(checkpoint)),
            Progress::Projected { from, to, report } => (from, to, report),
        };

        self.set_state(CycleState::Committing);
        self.checkpoints.advance(to).await?;

        info!(
            from,
            to,
            minted = report.counts.minted,
            verified = report.counts.verified,
            purchased = report.counts.purchased,
            replayed = report.replayed,
            "cycle complete"
        );
        Ok(CycleSummary {
            events_processed: report.counts,
            from_block: from,
            to_block: to,
        })
    }

    /// Everything up to the commit, bounded together by the cycle timeout.
    async fn project_range(
        &self,
        range: &mut Option<(u64, u64)>,
    ) -> Result<Progress, IndexerError> {
        let position = self.checkpoints.position().await?;
        let checkpoint = position.max(self.options.start_block.saturating_sub(1));
        let head = self
            .reader
            .head()
            .await?
            .saturating_sub(self.options.confirmations);

        if checkpoint >= head {
            debug!(checkpoint, head, "already caught up");
            return Ok(Progress::CaughtUp(checkpoint));
        }

        let (from, to) = (checkpoint + 1, head);
        *range = Some((from, to));
        info!(from, to, "cycle started");

        let report = self.fetch_and_project(from, to).await?;
        Ok(Progress::Projected { from, to, report })
    }

    async fn fetch_and_project(&self, from: u64, to: u64) -> Result<ProjectionReport, IndexerError> {
        self.set_state(CycleState::Fetching);
        let streams = try_join_all(
            self.decoder
                .specs()
                .iter()
                .map(|spec| self.fetch_events(spec, from, to)),
        )
        .await?;
        let events = merge_ordered(streams);
        debug!(from, to, events = events.len(), "range fetched");

        self.set_state(CycleState::Projecting);
        self.projector.apply_all(events).await
    }

    async fn fetch_events(
        &self,
        spec: &EventSpec,
        from: u64,
        to: u64,
    ) -> Result<Vec<DomainEvent>, IndexerError> {
        let logs = self
            .reader
            .fetch_logs(&spec.contract, &spec.topic0, from, to)
            .await?;
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            if let Some(event) = self.decoder.decode(log)? {
                events.push(event);
            }
        }
        debug!(event = %spec.kind, logs = logs.len(), events = events.len(), "signature fetched");
        Ok(events)
    }

    /// Run a cycle every `poll_interval` until `shutdown` resolves.
    ///
    /// Failures are logged and the next tick retries the same range.
    pub async fn watch<F>(&self, poll_interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = poll_interval.as_millis() as u64, "watching chain");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping");
                    return;
                }
                _ = ticker.tick() => {
                    // Failures are already logged by run_once.
                    let _ = self.run_once().await;
                }
            }
        }
    }
}
