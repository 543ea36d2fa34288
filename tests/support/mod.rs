#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;

use avalytics_indexer::indexer::Indexer;
use avalytics_indexer::indexer::progress::NoProgress;
use avalytics_indexer::indexer::rpc::{ChainClient, RpcClient};
use avalytics_indexer::models::common::{IndexerConfig, ReceiptSource};
use avalytics_indexer::models::datasets::blocks::{BlockRecord, RpcBlock, RpcBlockTransactions};
use avalytics_indexer::models::datasets::logs::{LogRecord, RpcLog};
use avalytics_indexer::models::datasets::transactions::{RpcReceipt, RpcTransaction, TransactionRecord};
use avalytics_indexer::models::datasets::wallets::WalletRecord;
use avalytics_indexer::models::errors::{RpcError, StorageError};
use avalytics_indexer::storage::{
    BatchWrite, Checkpoint, LedgerStats, LedgerStore, SqliteStore, WriteOutcome,
};
use avalytics_indexer::utils::retry::RetryPolicy;

pub const TXS_PER_BLOCK: u64 = 3;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    alloy_primitives::b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Head,
    Block(u64),
    Receipt(B256),
    BlockReceipts(u64),
}

/// Scripted C-Chain. Every block up to `head` exists and is generated from
/// its number unless overridden.
pub struct MockChain {
    head: AtomicU64,
    head_calls: AtomicU32,
    overrides: Mutex<HashMap<u64, RpcBlock>>,
    failures: Mutex<HashMap<u64, VecDeque<RpcError>>>,
    unreachable: Mutex<HashSet<u64>>,
    undecodable: Mutex<HashSet<u64>>,
    calls: Mutex<Vec<Call>>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            head_calls: AtomicU32::new(0),
            overrides: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            undecodable: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// The next `times` requests for the block time out.
    pub fn time_out(&self, number: u64, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(number).or_default();
        for _ in 0..times {
            queue.push_back(RpcError::Timeout {
                method: "eth_getBlockByNumber",
                timeout_ms: 1_000,
            });
        }
    }

    /// Every request for the block fails with a connection error.
    pub fn make_unreachable(&self, number: u64) {
        self.unreachable.lock().unwrap().insert(number);
    }

    pub fn restore(&self, number: u64) {
        self.unreachable.lock().unwrap().remove(&number);
    }

    /// Serves the block without a hash, as a node does for pending blocks.
    pub fn make_malformed(&self, number: u64) {
        let mut block = generated_block(number);
        block.hash = None;
        self.set_block(block);
    }

    /// Every response for the block fails to decode.
    pub fn make_undecodable(&self, number: u64) {
        self.undecodable.lock().unwrap().insert(number);
    }

    pub fn set_block(&self, block: RpcBlock) {
        self.overrides.lock().unwrap().insert(block.number, block);
    }

    pub fn head_calls(&self) -> u32 {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn block_requests(&self, number: u64) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == Call::Block(number))
            .count()
    }

    /// Distinct block numbers requested, ascending.
    pub fn requested_blocks(&self) -> Vec<u64> {
        let mut blocks: Vec<u64> = self
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Block(number) => Some(number),
                _ => None,
            })
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        blocks
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn block(&self, number: u64) -> Result<RpcBlock, RpcError> {
        if self.unreachable.lock().unwrap().contains(&number) {
            return Err(RpcError::Connection("connection reset by peer".into()));
        }
        if self.undecodable.lock().unwrap().contains(&number) {
            return Err(RpcError::Malformed {
                method: "eth_getBlockByNumber",
                reason: "invalid type: integer, expected a 0x-prefixed hex string".into(),
            });
        }
        if let Some(error) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&number)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if number > self.head.load(Ordering::SeqCst) {
            return Err(RpcError::NotFound {
                what: format!("block {number}"),
            });
        }
        Ok(self
            .overrides
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_else(|| generated_block(number)))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.record(Call::Head);
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn block_by_number(&self, number: u64) -> Result<RpcBlock, RpcError> {
        self.record(Call::Block(number));
        self.block(number)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, RpcError> {
        self.record(Call::Receipt(hash));
        let (number, index) = decode_tx_hash(hash);
        Ok(generated_receipt(number, index))
    }

    async fn block_receipts(&self, number: u64) -> Result<Vec<RpcReceipt>, RpcError> {
        self.record(Call::BlockReceipts(number));
        let block = self.block(number)?;
        Ok(block
            .transactions
            .hashes()
            .into_iter()
            .map(|hash| {
                let (number, index) = decode_tx_hash(hash);
                generated_receipt(number, index)
            })
            .collect())
    }
}

pub fn tx_hash(number: u64, index: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&number.to_be_bytes());
    bytes[8..16].copy_from_slice(&index.to_be_bytes());
    bytes[31] = 0x7f;
    B256::from(bytes)
}

fn decode_tx_hash(hash: B256) -> (u64, u64) {
    let bytes = hash.as_slice();
    let number = u64::from_be_bytes(bytes[..8].try_into().unwrap());
    let index = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
    (number, index)
}

/// Near the top of the u256 range, so any lossy conversion shows up.
pub fn tx_value(number: u64, index: u64) -> U256 {
    U256::MAX - U256::from(number * 100 + index)
}

pub fn generated_transaction(number: u64, index: u64) -> RpcTransaction {
    RpcTransaction {
        hash: tx_hash(number, index),
        block_number: Some(number),
        transaction_index: Some(index),
        from: Address::repeat_byte(0xa1),
        // First transaction of each block creates a contract
        to: (index > 0).then(|| Address::repeat_byte(0xb2)),
        value: tx_value(number, index),
        gas_price: Some(U256::from(25_000_000_000u64)),
        gas: 21_000,
        input: Bytes::from(vec![0x60, 0x80, index as u8]),
    }
}

pub fn generated_block(number: u64) -> RpcBlock {
    let mut hash = [0u8; 32];
    hash[24..].copy_from_slice(&number.to_be_bytes());
    RpcBlock {
        number,
        hash: Some(B256::from(hash)),
        timestamp: 1_700_000_000 + number * 2,
        gas_used: 21_000 * TXS_PER_BLOCK,
        transactions: RpcBlockTransactions::Full(
            (0..TXS_PER_BLOCK)
                .map(|index| generated_transaction(number, index))
                .collect(),
        ),
    }
}

pub fn generated_receipt(number: u64, index: u64) -> RpcReceipt {
    RpcReceipt {
        transaction_hash: tx_hash(number, index),
        block_number: Some(number),
        status: Some(if index % 2 == 0 { 1 } else { 0 }),
        gas_used: 21_000,
        effective_gas_price: Some(U256::from(25_000_000_000u64)),
        logs: vec![generated_log(number, index)],
    }
}

/// One Transfer event per transaction, emitted by a token at 0xc3..c3.
pub fn generated_log(number: u64, index: u64) -> RpcLog {
    RpcLog {
        address: Address::repeat_byte(0xc3),
        topics: vec![
            TRANSFER_TOPIC,
            Address::repeat_byte(0xa1).into_word(),
            Address::repeat_byte(0xb2).into_word(),
        ],
        data: Bytes::from(U256::from(number * 100 + index).to_be_bytes::<32>().to_vec()),
        log_index: Some(index),
        transaction_hash: Some(tx_hash(number, index)),
        removed: false,
    }
}

pub fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, 1, 2).without_jitter()
}

pub fn test_config(batch_size: u64) -> IndexerConfig {
    IndexerConfig {
        batch_size,
        max_workers: 4,
        block_retry_attempts: 3,
        block_retry_delay_ms: 1,
        receipts: ReceiptSource::Block,
        start_block: None,
        fresh_start_lookback: 10_000,
    }
}

pub fn rpc_client<C: ChainClient>(chain: C) -> RpcClient<C> {
    RpcClient::new(chain, fast_retry(5), Duration::from_secs(5))
}

pub fn indexer_with<C: ChainClient, S: LedgerStore>(chain: C, store: S, config: IndexerConfig) -> Indexer<C, S> {
    Indexer::new(rpc_client(chain), store, config).with_progress(Arc::new(NoProgress))
}

pub async fn indexer(chain: MockChain, config: IndexerConfig) -> Indexer<MockChain, SqliteStore> {
    let store = SqliteStore::in_memory().await.unwrap();
    indexer_with(chain, store, config)
}

/// Serves blocks from a [`MockChain`] after a delay that shrinks towards
/// `last`, so later blocks of a range finish first.
pub struct DelayedChain {
    inner: MockChain,
    last: u64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: Mutex<Vec<u64>>,
}

impl DelayedChain {
    pub fn new(inner: MockChain, last: u64) -> Self {
        Self {
            inner,
            last,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Most block requests that were running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completion_order(&self) -> Vec<u64> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for DelayedChain {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.inner.block_number().await
    }

    async fn block_by_number(&self, number: u64) -> Result<RpcBlock, RpcError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let steps = self.last.saturating_sub(number) + 1;
        tokio::time::sleep(Duration::from_millis(10 * steps)).await;
        let result = self.inner.block_by_number(number).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push(number);
        result
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<RpcReceipt, RpcError> {
        self.inner.transaction_receipt(hash).await
    }

    async fn block_receipts(&self, number: u64) -> Result<Vec<RpcReceipt>, RpcError> {
        self.inner.block_receipts(number).await
    }
}

/// SQLite store that remembers the block numbers of every write, and can be
/// told to fail them.
pub struct ObservedStore {
    inner: SqliteStore,
    fail_writes: bool,
    writes: Mutex<Vec<Vec<u64>>>,
}

impl ObservedStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_writes: false,
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(inner: SqliteStore) -> Self {
        Self {
            fail_writes: true,
            ..Self::new(inner)
        }
    }

    /// Block numbers handed to each `write_batch` call, in call order.
    pub fn writes(&self) -> Vec<Vec<u64>> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerStore for ObservedStore {
    async fn checkpoint(&self) -> Result<Option<Checkpoint>, StorageError> {
        self.inner.checkpoint().await
    }

    async fn write_batch(&self, batch: &BatchWrite) -> Result<WriteOutcome, StorageError> {
        self.writes
            .lock()
            .unwrap()
            .push(batch.blocks.iter().map(|b| b.block.number).collect());
        if self.fail_writes {
            return Err(StorageError::CorruptState {
                key: "last_block".into(),
                value: "disk full".into(),
            });
        }
        self.inner.write_batch(batch).await
    }

    async fn sync_target(&self) -> Result<Option<u64>, StorageError> {
        self.inner.sync_target().await
    }

    async fn set_sync_target(&self, target: u64) -> Result<(), StorageError> {
        self.inner.set_sync_target(target).await
    }

    async fn stats(&self) -> Result<LedgerStats, StorageError> {
        self.inner.stats().await
    }

    async fn block(&self, number: u64) -> Result<Option<BlockRecord>, StorageError> {
        self.inner.block(number).await
    }

    async fn transaction(&self, hash: &str) -> Result<Option<TransactionRecord>, StorageError> {
        self.inner.transaction(hash).await
    }

    async fn logs(&self, tx_hash: &str) -> Result<Vec<LogRecord>, StorageError> {
        self.inner.logs(tx_hash).await
    }

    async fn wallet(&self, address: &str) -> Result<Option<WalletRecord>, StorageError> {
        self.inner.wallet(address).await
    }

    async fn indexed_block_numbers(&self, start: u64, end: u64) -> Result<Vec<u64>, StorageError> {
        self.inner.indexed_block_numbers(start, end).await
    }
}
