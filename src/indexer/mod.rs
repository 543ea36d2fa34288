pub mod extractor;
pub mod progress;
pub mod rpc;
pub mod scheduler;
pub mod shutdown;
pub mod transformations;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::indexer::extractor::{BatchExtractor, BatchReport};
use crate::indexer::progress::ProgressObserver;
use crate::indexer::rpc::{ChainClient, RpcClient};
use crate::indexer::scheduler::SyncScheduler;
use crate::indexer::shutdown::ShutdownSignal;
use crate::metrics::Metrics;
use crate::models::common::IndexerConfig;
use crate::models::errors::{IndexerError, PartialBatchFailure, RunFailure, StorageError};
use crate::storage::{LedgerStats, LedgerStore};
use crate::utils::ratio;

/// What an operator command indexed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub blocks_indexed: u64,
    pub transactions_written: u64,
    pub skipped_blocks: u64,
    /// Last good checkpoint
    pub checkpoint: Option<u64>,
    /// Stopped early because shutdown was requested
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn record_batch(&mut self, report: &BatchReport) {
        self.blocks_indexed += report.blocks_written;
        self.transactions_written += report.transactions_written;
        self.skipped_blocks += report.skipped.len() as u64;
        self.checkpoint = report.checkpoint.or(self.checkpoint);
    }

    pub fn record_partial(&mut self, failure: &PartialBatchFailure) {
        self.blocks_indexed += failure.blocks_written;
        self.transactions_written += failure.transactions_written;
        self.checkpoint = failure.checkpoint.or(self.checkpoint);
    }

    /// `None` when no time has elapsed.
    pub fn blocks_per_second(&self) -> Option<f64> {
        ratio(self.blocks_indexed as f64, self.elapsed.as_secs_f64())
    }
}

/// Operator-level entry points over a chain client and a ledger.
pub struct Indexer<C, S> {
    rpc: Arc<RpcClient<C>>,
    store: Arc<S>,
    extractor: BatchExtractor<C, S>,
    config: IndexerConfig,
    shutdown: ShutdownSignal,
    metrics: Option<Arc<Metrics>>,
}

impl<C: ChainClient, S: LedgerStore> Indexer<C, S> {
    pub fn new(rpc: RpcClient<C>, store: S, config: IndexerConfig) -> Self {
        Self::from_shared(Arc::new(rpc), Arc::new(store), config)
    }

    pub fn from_shared(rpc: Arc<RpcClient<C>>, store: Arc<S>, config: IndexerConfig) -> Self {
        let extractor = BatchExtractor::new(rpc.clone(), store.clone(), config.clone());
        Self {
            rpc,
            store,
            extractor,
            config,
            shutdown: ShutdownSignal::never(),
            metrics: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.extractor = self.extractor.with_progress(progress);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.extractor = self.extractor.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn rpc(&self) -> &Arc<RpcClient<C>> {
        &self.rpc
    }

    pub fn extractor(&self) -> &BatchExtractor<C, S> {
        &self.extractor
    }

    /// Continuous sync loop sharing this indexer's client, store and shutdown signal.
    pub fn scheduler(&self, poll_interval: Duration) -> SyncScheduler<C, S> {
        let scheduler = SyncScheduler::new(
            self.rpc.clone(),
            self.store.clone(),
            self.extractor.clone(),
            poll_interval,
            self.shutdown.clone(),
        );
        match &self.metrics {
            Some(metrics) => scheduler.with_metrics(metrics.clone()),
            None => scheduler,
        }
    }

    /// Indexes the `count` most recent blocks, ending at the current head.
    pub async fn index_latest(&self, count: u64) -> Result<RunSummary, RunFailure> {
        let summary = self.initial_summary().await?;
        if count == 0 {
            return Err(RunFailure {
                summary,
                source: IndexerError::InvalidRange {
                    start: 0,
                    end: 0,
                    reason: "block count must be at least 1".to_string(),
                },
            });
        }

        let head = self.head(&summary).await?;
        let start = head.saturating_sub(count - 1);
        info!("Indexing latest {} blocks ({}-{})", count, start, head);
        self.index_range(start, head).await
    }

    /// Indexes `[start, end]` in batches of the configured size, stopping
    /// between batches if shutdown is requested.
    pub async fn index_range(&self, start: u64, end: u64) -> Result<RunSummary, RunFailure> {
        let started = Instant::now();
        let mut summary = self.initial_summary().await?;

        if start > end {
            return Err(RunFailure {
                summary,
                source: IndexerError::InvalidRange {
                    start,
                    end,
                    reason: "start is after end".to_string(),
                },
            });
        }

        let batch_size = self.config.batch_size.max(1);
        let mut batch_start = start;
        loop {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested; stopping before block {}", batch_start);
                summary.interrupted = true;
                break;
            }

            let batch_end = batch_start.saturating_add(batch_size - 1).min(end);
            match self
                .extractor
                .extract_range(batch_start, batch_end, self.config.max_workers)
                .await
            {
                Ok(report) => summary.record_batch(&report),
                Err(IndexerError::PartialBatch(failure)) => {
                    summary.record_partial(&failure);
                    summary.elapsed = started.elapsed();
                    return Err(RunFailure {
                        summary,
                        source: failure.into(),
                    });
                }
                Err(source) => {
                    summary.elapsed = started.elapsed();
                    return Err(RunFailure { summary, source });
                }
            }

            if batch_end >= end {
                break;
            }
            batch_start = batch_end + 1;
        }

        summary.elapsed = started.elapsed();
        info!(
            "Indexed {} blocks and {} transactions in {:.1}s; checkpoint {:?}",
            summary.blocks_indexed,
            summary.transactions_written,
            summary.elapsed.as_secs_f64(),
            summary.checkpoint
        );
        Ok(summary)
    }

    /// Continues from the checkpoint up to `target`, or up to the current
    /// head when no target is given. Without a checkpoint it starts at the
    /// configured start block or a fixed distance behind the head.
    pub async fn resume(&self, target: Option<u64>) -> Result<RunSummary, RunFailure> {
        let summary = self.initial_summary().await?;
        let checkpoint = self
            .store
            .checkpoint()
            .await
            .map_err(|e| failure(summary.clone(), e))?;

        let needs_head = target.is_none() || (checkpoint.is_none() && self.config.start_block.is_none());
        let head = if needs_head {
            Some(self.head(&summary).await?)
        } else {
            None
        };

        let Some(end) = target.or(head) else {
            return Ok(summary);
        };
        let start = match checkpoint {
            Some(checkpoint) => checkpoint.next_block(),
            None => self.fresh_start(head.unwrap_or(end)),
        };

        if start > end {
            info!("Already indexed through block {}", end);
            return Ok(summary);
        }

        self.store
            .set_sync_target(end)
            .await
            .map_err(|e| failure(summary.clone(), e))?;
        info!("Resuming from block {} to {}", start, end);
        self.index_range(start, end).await
    }

    pub async fn stats(&self) -> Result<LedgerStats, StorageError> {
        self.store.stats().await
    }

    fn fresh_start(&self, head: u64) -> u64 {
        self.config
            .start_block
            .unwrap_or_else(|| head.saturating_sub(self.config.fresh_start_lookback))
    }

    async fn initial_summary(&self) -> Result<RunSummary, RunFailure> {
        let checkpoint = self
            .store
            .checkpoint()
            .await
            .map_err(|e| failure(RunSummary::default(), e))?;
        Ok(RunSummary {
            checkpoint: checkpoint.map(|c| c.last_block),
            ..RunSummary::default()
        })
    }

    async fn head(&self, summary: &RunSummary) -> Result<u64, RunFailure> {
        let head = self
            .rpc
            .get_latest_block_number()
            .await
            .map_err(|e| failure(summary.clone(), e))?;
        if let Some(metrics) = &self.metrics {
            metrics.record_chain_tip(head, summary.checkpoint);
        }
        Ok(head)
    }
}

fn failure(summary: RunSummary, source: impl Into<IndexerError>) -> RunFailure {
    RunFailure {
        summary,
        source: source.into(),
    }
}
