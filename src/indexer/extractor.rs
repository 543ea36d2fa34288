use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{info, warn};

use crate::indexer::progress::{LogProgress, ProgressObserver};
use crate::indexer::rpc::{ChainClient, RpcClient};
use crate::indexer::transformations::{ReceiptLookup, normalize};
use crate::metrics::Metrics;
use crate::models::common::{IndexerConfig, MAX_WORKERS, NormalizedBlock, ReceiptSource, SkippedBlock};
use crate::models::errors::{IndexerError, MalformedDataError, PartialBatchFailure, RpcError};
use crate::storage::{BatchWrite, LedgerStore};
use crate::utils::retry::{Attempted, Transient, retry};

/// What one successful `extract_range` call wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub start: u64,
    pub end: u64,
    pub blocks_written: u64,
    pub transactions_written: u64,
    /// Blocks that failed to normalize on this pass
    pub skipped: Vec<SkippedBlock>,
    /// Last block of the contiguous prefix after the write
    pub checkpoint: Option<u64>,
}

#[derive(Debug, Error)]
enum BlockFetchError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Malformed(#[from] MalformedDataError),
}

impl Transient for BlockFetchError {
    // The RPC client has already retried its own transient errors. Another
    // round at this level covers endpoint lag and rotation, but a payload that
    // does not decode or normalize will not get better.
    fn is_transient(&self) -> bool {
        match self {
            BlockFetchError::Rpc(RpcError::Malformed { .. }) => false,
            BlockFetchError::Rpc(_) => true,
            BlockFetchError::Malformed(_) => false,
        }
    }
}

enum FetchOutcome {
    Fetched(NormalizedBlock),
    Malformed(MalformedDataError),
}

/// Fetches, normalizes and writes bounded block ranges.
pub struct BatchExtractor<C, S> {
    rpc: Arc<RpcClient<C>>,
    store: Arc<S>,
    config: IndexerConfig,
    progress: Arc<dyn ProgressObserver>,
    metrics: Option<Arc<Metrics>>,
}

impl<C, S> Clone for BatchExtractor<C, S> {
    fn clone(&self) -> Self {
        Self {
            rpc: self.rpc.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            progress: self.progress.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: ChainClient, S: LedgerStore> BatchExtractor<C, S> {
    pub fn new(rpc: Arc<RpcClient<C>>, store: Arc<S>, config: IndexerConfig) -> Self {
        Self {
            rpc,
            store,
            config,
            progress: Arc::new(LogProgress::default()),
            metrics: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Indexes `[start, end]`.
    ///
    /// Blocks are fetched with at most `max_workers` requests in flight and
    /// written in ascending order inside one storage transaction. If a block
    /// cannot be fetched, the contiguous prefix before it is written and a
    /// [`PartialBatchFailure`] names it. Blocks with malformed payloads are
    /// recorded as skipped and do not stop the batch.
    pub async fn extract_range(
        &self,
        start: u64,
        end: u64,
        max_workers: usize,
    ) -> Result<BatchReport, IndexerError> {
        self.validate_range(start, end)?;

        let workers = max_workers.clamp(1, MAX_WORKERS);
        let total = end - start + 1;

        let mut results = BTreeMap::new();
        let mut fetches = stream::iter(start..=end)
            .map(|number| async move { (number, self.fetch_with_retry(number).await) })
            .buffer_unordered(workers);

        let mut completed = 0;
        while let Some((number, result)) = fetches.next().await {
            completed += 1;
            self.progress.on_progress(completed, total);
            results.insert(number, result);
        }

        let mut batch = BatchWrite {
            start,
            end,
            ..BatchWrite::default()
        };
        let mut failure = None;

        for (number, result) in results {
            match result {
                Ok(FetchOutcome::Fetched(block)) => batch.blocks.push(block),
                Ok(FetchOutcome::Malformed(e)) => {
                    warn!("Skipping block {}: {}", number, e.reason);
                    batch.skipped.push(e.into());
                }
                Err(e) => {
                    failure = Some((number, e));
                    break;
                }
            }
        }

        if let Some((first_failed, _)) = &failure {
            batch.end = first_failed.saturating_sub(1);
        }

        let (outcome, checkpoint) = if batch.is_empty() {
            (None, self.store.checkpoint().await?)
        } else {
            let outcome = self.store.write_batch(&batch).await?;
            (Some(outcome), outcome.checkpoint)
        };
        let checkpoint = checkpoint.map(|c| c.last_block);
        let blocks_written = outcome.map_or(0, |o| o.blocks_written);
        let transactions_written = outcome.map_or(0, |o| o.transactions_written);
        let skipped_recorded = outcome.map_or(0, |o| o.skipped);

        if let Some(metrics) = &self.metrics {
            metrics.record_batch(blocks_written, transactions_written, skipped_recorded);
            if let Some(checkpoint) = checkpoint {
                metrics.record_checkpoint(checkpoint);
            }
        }

        if let Some((first_failed_block, source)) = failure {
            if let Some(metrics) = &self.metrics {
                metrics.record_partial_failure();
            }
            warn!(
                "Batch {}-{} stopped at block {}: wrote {} blocks, checkpoint {:?}",
                start, end, first_failed_block, blocks_written, checkpoint
            );
            return Err(PartialBatchFailure {
                start,
                end,
                first_failed_block,
                blocks_written,
                transactions_written,
                checkpoint,
                source,
            }
            .into());
        }

        info!(
            "Indexed blocks {}-{}: {} blocks, {} transactions, {} skipped, checkpoint {:?}",
            start,
            end,
            blocks_written,
            transactions_written,
            batch.skipped.len(),
            checkpoint
        );

        Ok(BatchReport {
            start,
            end,
            blocks_written,
            transactions_written,
            skipped: batch.skipped,
            checkpoint,
        })
    }

    fn validate_range(&self, start: u64, end: u64) -> Result<(), IndexerError> {
        if start > end {
            return Err(IndexerError::InvalidRange {
                start,
                end,
                reason: "start is after end".to_string(),
            });
        }
        let len = (end - start).saturating_add(1);
        if len > self.config.batch_size {
            return Err(IndexerError::InvalidRange {
                start,
                end,
                reason: format!(
                    "{len} blocks exceeds the batch size of {}",
                    self.config.batch_size
                ),
            });
        }
        Ok(())
    }

    /// Retries a whole block fetch after the RPC client has given up. A
    /// payload that never parses is reported as malformed rather than failed.
    async fn fetch_with_retry(&self, number: u64) -> Result<FetchOutcome, RpcError> {
        let policy = self.config.block_retry_policy();
        let context = format!("fetch block {number}");

        match retry(|| self.fetch_block(number), &policy, &context).await {
            Ok(block) => Ok(FetchOutcome::Fetched(block)),
            Err(Attempted {
                error: BlockFetchError::Malformed(e),
                ..
            }) => Ok(FetchOutcome::Malformed(e)),
            Err(Attempted {
                error: BlockFetchError::Rpc(RpcError::Malformed { method, reason }),
                ..
            }) => Ok(FetchOutcome::Malformed(MalformedDataError::new(
                number,
                format!("undecodable {method} response: {reason}"),
            ))),
            Err(Attempted {
                error: BlockFetchError::Rpc(e),
                ..
            }) => Err(e),
        }
    }

    async fn fetch_block(&self, number: u64) -> Result<NormalizedBlock, BlockFetchError> {
        let raw = self.rpc.get_block(number).await?;

        let receipts = match self.config.receipts {
            ReceiptSource::Skip => ReceiptLookup::Skipped,
            _ if raw.transactions.is_empty() => ReceiptLookup::from_receipts(Vec::new()),
            ReceiptSource::Block => {
                ReceiptLookup::from_receipts(self.rpc.get_block_receipts(number).await?)
            }
            ReceiptSource::Transaction => {
                let mut receipts = Vec::with_capacity(raw.transactions.len());
                for hash in raw.transactions.hashes() {
                    receipts.push(self.rpc.get_transaction_receipt(hash).await?);
                }
                ReceiptLookup::from_receipts(receipts)
            }
        };

        Ok(normalize(&raw, &receipts)?)
    }
}
