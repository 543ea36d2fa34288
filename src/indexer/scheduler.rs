use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::indexer::extractor::{BatchExtractor, BatchReport};
use crate::indexer::rpc::{ChainClient, RpcClient};
use crate::indexer::shutdown::ShutdownSignal;
use crate::indexer::RunSummary;
use crate::metrics::Metrics;
use crate::models::common::IndexerConfig;
use crate::models::errors::{IndexerError, RunFailure};
use crate::storage::LedgerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    FetchingHead,
    Extracting,
    AdvancingCheckpoint,
    Sleeping,
    Stopped,
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new up to `head`
    CaughtUp { head: u64 },
    Indexed { report: BatchReport, head: u64 },
}

impl CycleOutcome {
    /// More blocks are already available, so the next cycle should not wait.
    pub fn is_behind(&self) -> bool {
        matches!(self, CycleOutcome::Indexed { report, head } if report.end < *head)
    }
}

/// Continuous catch-up loop: one batch per cycle from the checkpoint towards
/// the chain head.
pub struct SyncScheduler<C, S> {
    rpc: Arc<RpcClient<C>>,
    store: Arc<S>,
    extractor: BatchExtractor<C, S>,
    config: IndexerConfig,
    poll_interval: Duration,
    resume: bool,
    shutdown: ShutdownSignal,
    state: watch::Sender<SyncState>,
    metrics: Option<Arc<Metrics>>,
}

impl<C: ChainClient, S: LedgerStore> SyncScheduler<C, S> {
    pub fn new(
        rpc: Arc<RpcClient<C>>,
        store: Arc<S>,
        extractor: BatchExtractor<C, S>,
        poll_interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        let config = extractor.config().clone();
        Self {
            rpc,
            store,
            extractor,
            config,
            poll_interval,
            resume: false,
            shutdown,
            state: watch::Sender::new(SyncState::Idle),
            metrics: None,
        }
    }

    /// Starts from the persisted sync target instead of asking for the head.
    pub fn resuming(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SyncState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Sync state {:?} -> {:?}", previous, next);
        }
    }

    /// Runs until shutdown is requested or storage fails.
    pub async fn run(&self) -> Result<RunSummary, RunFailure> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        match self.store.checkpoint().await {
            Ok(checkpoint) => summary.checkpoint = checkpoint.map(|c| c.last_block),
            Err(e) => return Err(self.stop(summary, started, e.into())),
        }

        let mut resume_pending = self.resume;
        info!(
            "Starting sync loop (poll interval {:?}, resume: {})",
            self.poll_interval, resume_pending
        );

        while !self.shutdown.is_triggered() {
            let cycle = self.run_cycle(resume_pending).await;
            resume_pending = false;

            match cycle {
                Ok(outcome) => {
                    let behind = outcome.is_behind();
                    if let CycleOutcome::Indexed { report, .. } = outcome {
                        summary.record_batch(&report);
                    }
                    if behind {
                        continue;
                    }
                }
                Err(IndexerError::PartialBatch(failure)) => {
                    warn!("{}; retrying next cycle", failure);
                    summary.record_partial(&failure);
                }
                Err(e) if e.is_fatal() => {
                    error!("Sync stopped: {}", e);
                    return Err(self.stop(summary, started, e));
                }
                Err(e) => warn!("Sync cycle failed: {}; retrying next cycle", e),
            }

            self.sleep().await;
        }

        info!("Shutdown requested; sync loop stopped");
        self.transition(SyncState::Stopped);
        summary.interrupted = true;
        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// One cycle: read the checkpoint, pick a target, extract one batch.
    ///
    /// When `resume` is set and a persisted sync target lies beyond the
    /// checkpoint, that target is used and the head is not fetched.
    pub async fn run_cycle(&self, resume: bool) -> Result<CycleOutcome, IndexerError> {
        let checkpoint = self.store.checkpoint().await?;

        let pending_target = if resume {
            match (self.store.sync_target().await?, checkpoint) {
                (Some(target), Some(checkpoint)) if target > checkpoint.last_block => {
                    info!(
                        "Resuming from block {} towards sync target {}",
                        checkpoint.next_block(),
                        target
                    );
                    Some(target)
                }
                _ => None,
            }
        } else {
            None
        };

        let head = match pending_target {
            Some(target) => target,
            None => {
                self.transition(SyncState::FetchingHead);
                let head = self.rpc.get_latest_block_number().await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_chain_tip(head, checkpoint.map(|c| c.last_block));
                }
                head
            }
        };

        let start = match checkpoint {
            Some(checkpoint) => checkpoint.next_block(),
            None => self
                .config
                .start_block
                .unwrap_or_else(|| head.saturating_sub(self.config.fresh_start_lookback)),
        };
        if start > head {
            debug!("Caught up at block {}", head);
            return Ok(CycleOutcome::CaughtUp { head });
        }

        let end = head.min(start.saturating_add(self.config.batch_size.saturating_sub(1)));

        self.transition(SyncState::Extracting);
        self.store.set_sync_target(head).await?;
        let report = self
            .extractor
            .extract_range(start, end, self.config.max_workers)
            .await?;

        self.transition(SyncState::AdvancingCheckpoint);
        debug!(
            "Checkpoint now {:?}, {} blocks behind head {}",
            report.checkpoint,
            head.saturating_sub(report.checkpoint.unwrap_or(0)),
            head
        );

        Ok(CycleOutcome::Indexed { report, head })
    }

    async fn sleep(&self) {
        self.transition(SyncState::Sleeping);
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = shutdown.triggered() => {}
        }
    }

    fn stop(&self, mut summary: RunSummary, started: Instant, source: IndexerError) -> RunFailure {
        self.transition(SyncState::Stopped);
        summary.elapsed = started.elapsed();
        RunFailure { summary, source }
    }
}
