pub mod checkpoint;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::common::{NormalizedBlock, SkippedBlock};
use crate::models::datasets::blocks::BlockRecord;
use crate::models::datasets::logs::LogRecord;
use crate::models::datasets::transactions::TransactionRecord;
use crate::models::datasets::wallets::WalletRecord;
use crate::models::errors::StorageError;
use crate::utils::ratio;

pub use checkpoint::Checkpoint;
pub use sqlite::SqliteStore;

/// One atomic write: every block in `[start, end]` is either in `blocks` or
/// in `skipped`, in ascending order.
#[derive(Debug, Clone, Default)]
pub struct BatchWrite {
    pub start: u64,
    pub end: u64,
    pub blocks: Vec<NormalizedBlock>,
    pub skipped: Vec<SkippedBlock>,
}

impl BatchWrite {
    pub fn transaction_count(&self) -> u64 {
        self.blocks.iter().map(|b| b.transactions.len() as u64).sum()
    }

    pub fn log_count(&self) -> u64 {
        self.blocks.iter().map(|b| b.logs.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub blocks_written: u64,
    pub transactions_written: u64,
    pub logs_written: u64,
    /// Wallet rows recomputed from the stored transactions
    pub wallets_refreshed: u64,
    /// Skips recorded. A block already stored is kept rather than marked skipped.
    pub skipped: u64,
    /// Checkpoint after the write committed
    pub checkpoint: Option<Checkpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub blocks: u64,
    pub transactions: u64,
    pub logs: u64,
    pub wallets: u64,
    pub skipped_blocks: u64,
    pub lowest_block: Option<u64>,
    pub highest_block: Option<u64>,
    pub checkpoint: Option<Checkpoint>,
    pub sync_target: Option<u64>,
}

impl LedgerStats {
    /// `None` when nothing has been indexed yet.
    pub fn average_transactions_per_block(&self) -> Option<f64> {
        ratio(self.transactions as f64, self.blocks as f64)
    }
}

/// Durable ledger of blocks, transactions, logs, wallet activity and indexer
/// state.
///
/// Only one writer may use a store at a time.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, StorageError>;

    /// Upserts the batch, refreshes the wallets it touches and advances the
    /// checkpoint in a single transaction.
    async fn write_batch(&self, batch: &BatchWrite) -> Result<WriteOutcome, StorageError>;

    async fn sync_target(&self) -> Result<Option<u64>, StorageError>;

    async fn set_sync_target(&self, target: u64) -> Result<(), StorageError>;

    async fn stats(&self) -> Result<LedgerStats, StorageError>;

    async fn block(&self, number: u64) -> Result<Option<BlockRecord>, StorageError>;

    async fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StorageError>;

    /// Logs emitted by one transaction, by log index.
    async fn logs(&self, tx_hash: &str) -> Result<Vec<LogRecord>, StorageError>;

    async fn wallet(&self, address: &str) -> Result<Option<WalletRecord>, StorageError>;

    /// Block numbers present in `[start, end]`, ascending.
    async fn indexed_block_numbers(&self, start: u64, end: u64) -> Result<Vec<u64>, StorageError>;
}
