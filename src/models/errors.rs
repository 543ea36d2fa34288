use thiserror::Error;

use crate::indexer::RunSummary;
use crate::utils::retry::Transient;

fn checkpoint_label(checkpoint: Option<u64>) -> String {
    checkpoint.map_or_else(|| "none".to_string(), |block| block.to_string())
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout { method: &'static str, timeout_ms: u64 },
    #[error("connection to RPC endpoint failed: {0}")]
    Connection(String),
    #[error("RPC endpoint rate limited the request: {0}")]
    RateLimited(String),
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("malformed {method} response: {reason}")]
    Malformed { method: &'static str, reason: String },
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("{method} failed after {attempts} attempts: {source}")]
    Exhausted {
        method: &'static str,
        attempts: u32,
        #[source]
        source: Box<RpcError>,
    },
}

impl Transient for RpcError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Timeout { .. } | RpcError::Connection(_) | RpcError::RateLimited(_)
        )
    }
}

impl RpcError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            RpcError::RateLimited(_) => true,
            RpcError::Exhausted { source, .. } => source.is_rate_limited(),
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed block {block_number}: {reason}")]
pub struct MalformedDataError {
    pub block_number: u64,
    pub reason: String,
}

impl MalformedDataError {
    pub fn new(block_number: u64, reason: impl Into<String>) -> Self {
        Self {
            block_number,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt indexer state: {key} = {value:?}")]
    CorruptState { key: String, value: String },
    #[error("invalid value in column {column}: {value:?}")]
    InvalidColumn { column: &'static str, value: String },
}

/// A block in the batch could not be fetched after every retry. Only the
/// contiguous prefix before `first_failed_block` was written.
#[derive(Error, Debug)]
#[error(
    "block {first_failed_block} could not be fetched in batch {start}-{end}; wrote {blocks_written} blocks, last good checkpoint: {}",
    checkpoint_label(*.checkpoint)
)]
pub struct PartialBatchFailure {
    pub start: u64,
    pub end: u64,
    pub first_failed_block: u64,
    pub blocks_written: u64,
    pub transactions_written: u64,
    pub checkpoint: Option<u64>,
    #[source]
    pub source: RpcError,
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("invalid block range {start}-{end}: {reason}")]
    InvalidRange {
        start: u64,
        end: u64,
        reason: String,
    },
    #[error(transparent)]
    PartialBatch(#[from] PartialBatchFailure),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl IndexerError {
    /// Storage failures stop the pipeline; everything else may be retried on a later cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexerError::Storage(_) | IndexerError::InvalidRange { .. })
    }
}

/// Operator-facing failure. Always carries what was durably indexed before the error.
#[derive(Error, Debug)]
#[error("{source}; last good checkpoint: {}", checkpoint_label(.summary.checkpoint))]
pub struct RunFailure {
    pub summary: RunSummary,
    pub source: IndexerError,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid RPC URL {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}
