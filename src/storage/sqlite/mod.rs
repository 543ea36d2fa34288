pub mod schema;

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::models::common::Wei;
use crate::models::datasets::blocks::BlockRecord;
use crate::models::datasets::logs::{LogRecord, MAX_TOPICS};
use crate::models::datasets::transactions::{TransactionRecord, TxStatus};
use crate::models::datasets::wallets::WalletRecord;
use crate::models::errors::StorageError;
use crate::storage::{BatchWrite, Checkpoint, LedgerStats, LedgerStore, WriteOutcome};

use schema::*;

/// SQLite-backed ledger.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        info!(path = %path.display(), "Opened SQLite ledger");
        Ok(store)
    }

    /// Private in-memory database. All handles share one connection, so the
    /// data lives as long as the store.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        read_checkpoint(&mut conn).await
    }

    async fn write_batch(&self, batch: &BatchWrite) -> Result<WriteOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut touched = BTreeSet::new();

        for normalized in &batch.blocks {
            let block = &normalized.block;
            let number = to_db(block.number, "block_number")?;

            // A re-fetched block may move transactions between addresses
            let previous: Vec<(String, Option<String>)> = sqlx::query_as(SELECT_BLOCK_ADDRESSES)
                .bind(number)
                .fetch_all(&mut *tx)
                .await?;
            for (from, to) in previous {
                touched.insert(from);
                touched.extend(to);
            }

            sqlx::query(UPSERT_BLOCK)
                .bind(number)
                .bind(block.hash.as_str())
                .bind(block.timestamp)
                .bind(to_db(block.gas_used, "gas_used")?)
                .bind(i64::from(block.transaction_count))
                .execute(&mut *tx)
                .await?;

            for transaction in &normalized.transactions {
                sqlx::query(UPSERT_TRANSACTION)
                    .bind(transaction.hash.as_str())
                    .bind(number)
                    .bind(to_db(transaction.tx_index, "tx_index")?)
                    .bind(transaction.from_address.as_str())
                    .bind(transaction.to_address.as_deref())
                    .bind(transaction.value.to_string())
                    .bind(transaction.gas_price.to_string())
                    .bind(
                        transaction
                            .gas_used
                            .map(|gas| to_db(gas, "gas_used"))
                            .transpose()?,
                    )
                    .bind(transaction.status.map(TxStatus::as_i64))
                    .bind(transaction.timestamp)
                    .bind(transaction.input_data.as_slice())
                    .execute(&mut *tx)
                    .await?;

                touched.insert(transaction.from_address.clone());
                touched.extend(transaction.to_address.clone());
            }

            for log in &normalized.logs {
                let mut topics = log.topics.iter().map(String::as_str);
                let mut query = sqlx::query(UPSERT_LOG)
                    .bind(log.tx_hash.as_str())
                    .bind(to_db(log.log_index, "log_index")?)
                    .bind(number)
                    .bind(log.address.as_str());
                for _ in 0..MAX_TOPICS {
                    query = query.bind(topics.next());
                }
                query
                    .bind(log.data.as_slice())
                    .bind(log.timestamp)
                    .execute(&mut *tx)
                    .await?;
            }

            sqlx::query(CLEAR_SKIPPED).bind(number).execute(&mut *tx).await?;
        }

        let mut skipped_recorded = 0;
        for skipped in &batch.skipped {
            let number = to_db(skipped.block_number, "block_number")?;
            let indexed: Option<i64> = sqlx::query_scalar(BLOCK_EXISTS)
                .bind(number)
                .fetch_optional(&mut *tx)
                .await?;
            if indexed.is_some() {
                warn!(
                    block = skipped.block_number,
                    reason = %skipped.reason,
                    "Keeping previously indexed block instead of marking it skipped"
                );
                continue;
            }

            sqlx::query(UPSERT_SKIPPED)
                .bind(number)
                .bind(skipped.reason.as_str())
                .execute(&mut *tx)
                .await?;
            skipped_recorded += 1;
        }

        for address in &touched {
            refresh_wallet(&mut tx, address).await?;
        }

        let current = read_checkpoint(&mut tx).await?;
        let advanced = if covers_range(batch) {
            Checkpoint::advance(current, batch.start, batch.end)
        } else {
            if !batch.is_empty() {
                warn!(
                    start = batch.start,
                    end = batch.end,
                    "Batch does not cover its range; checkpoint left unchanged"
                );
            }
            None
        };

        if let Some(next) = advanced {
            write_state(&mut tx, ORIGIN_BLOCK_KEY, next.origin).await?;
            write_state(&mut tx, LAST_BLOCK_KEY, next.last_block).await?;
        }

        tx.commit().await?;

        let checkpoint = advanced.or(current);
        debug!(
            start = batch.start,
            end = batch.end,
            blocks = batch.blocks.len(),
            skipped = skipped_recorded,
            wallets = touched.len(),
            checkpoint = ?checkpoint.map(|c| c.last_block),
            "Committed batch"
        );

        Ok(WriteOutcome {
            blocks_written: batch.blocks.len() as u64,
            transactions_written: batch.transaction_count(),
            logs_written: batch.log_count(),
            wallets_refreshed: touched.len() as u64,
            skipped: skipped_recorded,
            checkpoint,
        })
    }

    async fn sync_target(&self) -> Result<Option<u64>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        read_state(&mut conn, SYNC_TARGET_KEY)
            .await?
            .map(|value| parse_state(SYNC_TARGET_KEY, value))
            .transpose()
    }

    async fn set_sync_target(&self, target: u64) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await?;
        write_state(&mut conn, SYNC_TARGET_KEY, target).await
    }

    async fn stats(&self) -> Result<LedgerStats, StorageError> {
        let mut conn = self.pool.acquire().await?;

        let (blocks, lowest, highest): (i64, Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MIN(block_number), MAX(block_number) FROM blocks")
                .fetch_one(&mut *conn)
                .await?;
        let transactions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&mut *conn)
            .await?;
        let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_logs")
            .fetch_one(&mut *conn)
            .await?;
        let wallets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wallets")
            .fetch_one(&mut *conn)
            .await?;
        let skipped_blocks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skipped_blocks")
            .fetch_one(&mut *conn)
            .await?;

        let checkpoint = read_checkpoint(&mut conn).await?;
        let sync_target = read_state(&mut conn, SYNC_TARGET_KEY)
            .await?
            .map(|value| parse_state(SYNC_TARGET_KEY, value))
            .transpose()?;

        Ok(LedgerStats {
            blocks: from_db(blocks, "blocks")?,
            transactions: from_db(transactions, "transactions")?,
            logs: from_db(logs, "logs")?,
            wallets: from_db(wallets, "wallets")?,
            skipped_blocks: from_db(skipped_blocks, "skipped_blocks")?,
            lowest_block: lowest.map(|n| from_db(n, "block_number")).transpose()?,
            highest_block: highest.map(|n| from_db(n, "block_number")).transpose()?,
            checkpoint,
            sync_target,
        })
    }

    async fn block(&self, number: u64) -> Result<Option<BlockRecord>, StorageError> {
        let row: Option<BlockRow> = sqlx::query_as(SELECT_BLOCK)
            .bind(to_db(number, "block_number")?)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BlockRecord::try_from).transpose()
    }

    async fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StorageError> {
        let row: Option<TransactionRow> = sqlx::query_as(SELECT_TRANSACTION)
            .bind(hash.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TransactionRecord::try_from).transpose()
    }

    async fn logs(&self, tx_hash: &str) -> Result<Vec<LogRecord>, StorageError> {
        let rows: Vec<LogRow> = sqlx::query_as(SELECT_LOGS)
            .bind(tx_hash.to_ascii_lowercase())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LogRecord::try_from).collect()
    }

    async fn wallet(&self, address: &str) -> Result<Option<WalletRecord>, StorageError> {
        let row: Option<WalletRow> = sqlx::query_as(SELECT_WALLET)
            .bind(address.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.map(WalletRecord::try_from).transpose()
    }

    async fn indexed_block_numbers(&self, start: u64, end: u64) -> Result<Vec<u64>, StorageError> {
        let numbers: Vec<i64> = sqlx::query_scalar(
            "SELECT block_number FROM blocks WHERE block_number BETWEEN ? AND ? ORDER BY block_number",
        )
        .bind(to_db(start, "block_number")?)
        .bind(to_db(end, "block_number")?)
        .fetch_all(&self.pool)
        .await?;
        numbers.into_iter().map(|n| from_db(n, "block_number")).collect()
    }
}

/// Every block of `[start, end]` is accounted for, either written or skipped.
fn covers_range(batch: &BatchWrite) -> bool {
    if batch.start > batch.end {
        return false;
    }
    let handled: BTreeSet<u64> = batch
        .blocks
        .iter()
        .map(|b| b.block.number)
        .chain(batch.skipped.iter().map(|s| s.block_number))
        .collect();

    handled.first() == Some(&batch.start)
        && handled.last() == Some(&batch.end)
        && handled.len() as u64 == batch.end - batch.start + 1
}

/// Recomputes one wallet from every stored transaction touching it, so
/// rewriting a range never counts a transaction twice.
async fn refresh_wallet(conn: &mut SqliteConnection, address: &str) -> Result<(), StorageError> {
    let rows: Vec<(DateTime<Utc>, String)> = sqlx::query_as(SELECT_WALLET_ACTIVITY)
        .bind(address)
        .bind(address)
        .fetch_all(&mut *conn)
        .await?;
    let activity = rows
        .into_iter()
        .map(|(timestamp, value)| parse_wei("value", value).map(|value| (timestamp, value)))
        .collect::<Result<Vec<_>, _>>()?;

    match WalletRecord::from_activity(address, activity) {
        Some(wallet) => {
            sqlx::query(UPSERT_WALLET)
                .bind(wallet.address.as_str())
                .bind(wallet.first_seen)
                .bind(wallet.last_active)
                .bind(to_db(wallet.total_txs, "total_txs")?)
                .bind(wallet.total_volume.to_string())
                .execute(&mut *conn)
                .await?;
        }
        None => {
            sqlx::query(DELETE_WALLET).bind(address).execute(&mut *conn).await?;
        }
    }
    Ok(())
}

async fn read_state(conn: &mut SqliteConnection, key: &'static str) -> Result<Option<String>, StorageError> {
    let value = sqlx::query_scalar::<_, String>(SELECT_STATE)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}

async fn write_state(conn: &mut SqliteConnection, key: &'static str, value: u64) -> Result<(), StorageError> {
    sqlx::query(UPSERT_STATE)
        .bind(key)
        .bind(value.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn parse_state(key: &'static str, value: String) -> Result<u64, StorageError> {
    value.parse::<u64>().map_err(|_| StorageError::CorruptState {
        key: key.to_string(),
        value,
    })
}

async fn read_checkpoint(conn: &mut SqliteConnection) -> Result<Option<Checkpoint>, StorageError> {
    let last = read_state(conn, LAST_BLOCK_KEY).await?;
    let origin = read_state(conn, ORIGIN_BLOCK_KEY).await?;

    match (origin, last) {
        (None, None) => Ok(None),
        (Some(origin), None) => Err(StorageError::CorruptState {
            key: ORIGIN_BLOCK_KEY.to_string(),
            value: format!("{origin} without {LAST_BLOCK_KEY}"),
        }),
        // Databases written before the origin was tracked only hold last_block
        (None, Some(last)) => {
            let last = parse_state(LAST_BLOCK_KEY, last)?;
            Ok(Some(Checkpoint::new(last, last)))
        }
        (Some(origin), Some(last)) => {
            let checkpoint = Checkpoint::new(
                parse_state(ORIGIN_BLOCK_KEY, origin)?,
                parse_state(LAST_BLOCK_KEY, last)?,
            );
            if checkpoint.origin > checkpoint.last_block {
                return Err(StorageError::CorruptState {
                    key: ORIGIN_BLOCK_KEY.to_string(),
                    value: format!("{} after {LAST_BLOCK_KEY} {}", checkpoint.origin, checkpoint.last_block),
                });
            }
            Ok(Some(checkpoint))
        }
    }
}

fn to_db(value: u64, column: &'static str) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::InvalidColumn {
        column,
        value: value.to_string(),
    })
}

fn from_db(value: i64, column: &'static str) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::InvalidColumn {
        column,
        value: value.to_string(),
    })
}

fn parse_wei(column: &'static str, value: String) -> Result<Wei, StorageError> {
    value
        .parse::<Wei>()
        .map_err(|_| StorageError::InvalidColumn { column, value })
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    block_number: i64,
    block_hash: String,
    timestamp: DateTime<Utc>,
    gas_used: i64,
    tx_count: i64,
}

impl TryFrom<BlockRow> for BlockRecord {
    type Error = StorageError;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        Ok(BlockRecord {
            number: from_db(row.block_number, "block_number")?,
            hash: row.block_hash,
            timestamp: row.timestamp,
            gas_used: from_db(row.gas_used, "gas_used")?,
            transaction_count: u32::try_from(row.tx_count).map_err(|_| StorageError::InvalidColumn {
                column: "tx_count",
                value: row.tx_count.to_string(),
            })?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    tx_hash: String,
    block_number: i64,
    tx_index: i64,
    from_address: String,
    to_address: Option<String>,
    value: String,
    gas_price: String,
    gas_used: Option<i64>,
    status: Option<i64>,
    timestamp: DateTime<Utc>,
    input_data: Vec<u8>,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = StorageError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .map(|code| {
                TxStatus::from_i64(code).ok_or_else(|| StorageError::InvalidColumn {
                    column: "status",
                    value: code.to_string(),
                })
            })
            .transpose()?;

        Ok(TransactionRecord {
            hash: row.tx_hash,
            block_number: from_db(row.block_number, "block_number")?,
            tx_index: from_db(row.tx_index, "tx_index")?,
            from_address: row.from_address,
            to_address: row.to_address,
            value: parse_wei("value", row.value)?,
            gas_price: parse_wei("gas_price", row.gas_price)?,
            gas_used: row.gas_used.map(|gas| from_db(gas, "gas_used")).transpose()?,
            status,
            timestamp: row.timestamp,
            input_data: row.input_data,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    tx_hash: String,
    log_index: i64,
    block_number: i64,
    address: String,
    topic0: Option<String>,
    topic1: Option<String>,
    topic2: Option<String>,
    topic3: Option<String>,
    data: Vec<u8>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<LogRow> for LogRecord {
    type Error = StorageError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(LogRecord {
            tx_hash: row.tx_hash,
            log_index: from_db(row.log_index, "log_index")?,
            block_number: from_db(row.block_number, "block_number")?,
            address: row.address,
            topics: [row.topic0, row.topic1, row.topic2, row.topic3]
                .into_iter()
                .flatten()
                .collect(),
            data: row.data,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    address: String,
    first_seen: DateTime<Utc>,
    last_active: DateTime<Utc>,
    total_txs: i64,
    total_volume_wei: String,
}

impl TryFrom<WalletRow> for WalletRecord {
    type Error = StorageError;

    fn try_from(row: WalletRow) -> Result<Self, Self::Error> {
        Ok(WalletRecord {
            address: row.address,
            first_seen: row.first_seen,
            last_active: row.last_active,
            total_txs: from_db(row.total_txs, "total_txs")?,
            total_volume: parse_wei("total_volume_wei", row.total_volume_wei)?,
        })
    }
}
