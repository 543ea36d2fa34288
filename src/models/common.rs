use alloy_primitives::U256;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

use crate::models::datasets::blocks::BlockRecord;
use crate::models::datasets::logs::LogRecord;
use crate::models::datasets::transactions::TransactionRecord;
use crate::models::errors::{ConfigError, MalformedDataError};
use crate::utils::retry::RetryPolicy;

pub const MAX_BATCH_SIZE: u64 = 500;
pub const MAX_WORKERS: usize = 64;
pub const MAX_RETRY_ATTEMPTS: u32 = 20;
pub const MAX_RPC_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    /// Check the local node's health and fall back to the public endpoint
    Auto,
    Local,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptSource {
    /// One `eth_getBlockReceipts` call per block
    Block,
    /// One `eth_getTransactionReceipt` call per transaction
    Transaction,
    /// Do not fetch receipts; `status` and `gas_used` are stored as unknown
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub endpoint: EndpointMode,
    /// Explicit endpoint; bypasses local/public selection when set
    pub url: Option<String>,
    pub local_url: String,
    pub local_health_url: String,
    pub public_url: String,
    pub fallback_urls: Vec<String>,
    pub timeout_secs: u64,
    pub public_requests_per_second: u32,
    pub public_max_concurrency: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointMode::Auto,
            url: None,
            local_url: "http://localhost:9650/ext/bc/C/rpc".to_string(),
            local_health_url: "http://localhost:9650/ext/health".to_string(),
            public_url: "https://api.avax.network/ext/bc/C/rpc".to_string(),
            fallback_urls: vec![
                "https://avalanche-c-chain.publicnode.com".to_string(),
                "https://rpc.ankr.com/avalanche".to_string(),
            ],
            timeout_secs: 30,
            public_requests_per_second: 10,
            public_max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub batch_size: u64,
    pub max_workers: usize,
    pub block_retry_attempts: u32,
    pub block_retry_delay_ms: u64,
    pub receipts: ReceiptSource,
    pub start_block: Option<u64>,
    pub fresh_start_lookback: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_workers: 4,
            block_retry_attempts: 3,
            block_retry_delay_ms: 500,
            receipts: ReceiptSource::Block,
            start_block: None,
            fresh_start_lookback: 10_000,
        }
    }
}

impl IndexerConfig {
    /// Batch-level retry policy applied on top of the RPC client's own retries.
    pub fn block_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.block_retry_attempts,
            self.block_retry_delay_ms,
            self.block_retry_delay_ms.saturating_mul(4),
        )
        .without_jitter()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 12,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/avalytics.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain_name: String,
    pub rpc: RpcConfig,
    pub retry: RetryPolicy,
    pub indexer: IndexerConfig,
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain_name: "avalanche_c_chain".to_string(),
            rpc: RpcConfig::default(),
            retry: RetryPolicy::default(),
            indexer: IndexerConfig::default(),
            sync: SyncConfig::default(),
            database: DatabaseConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

pub(crate) fn parse_url(url: &str) -> Result<Url, ConfigError> {
    url.parse().map_err(|source| ConfigError::Url {
        url: url.to_string(),
        source,
    })
}

impl Config {
    /// Rejects values outside the ranges the pipeline is built for instead of
    /// trusting operator input.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let indexer = &self.indexer;
        if !(1..=MAX_BATCH_SIZE).contains(&indexer.batch_size) {
            return Err(invalid(
                "indexer.batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}, got {}", indexer.batch_size),
            ));
        }
        if !(1..=MAX_WORKERS).contains(&indexer.max_workers) {
            return Err(invalid(
                "indexer.max_workers",
                format!("must be between 1 and {MAX_WORKERS}, got {}", indexer.max_workers),
            ));
        }
        if !(1..=10).contains(&indexer.block_retry_attempts) {
            return Err(invalid(
                "indexer.block_retry_attempts",
                format!("must be between 1 and 10, got {}", indexer.block_retry_attempts),
            ));
        }

        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.retry.max_attempts) {
            return Err(invalid(
                "retry.max_attempts",
                format!(
                    "must be between 1 and {MAX_RETRY_ATTEMPTS}, got {}",
                    self.retry.max_attempts
                ),
            ));
        }
        if self.retry.exponential < 1.0 || !self.retry.exponential.is_finite() {
            return Err(invalid("retry.exponential", "must be a finite factor >= 1.0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        if !(1..=MAX_RPC_TIMEOUT_SECS).contains(&self.rpc.timeout_secs) {
            return Err(invalid(
                "rpc.timeout_secs",
                format!(
                    "must be between 1 and {MAX_RPC_TIMEOUT_SECS}, got {}",
                    self.rpc.timeout_secs
                ),
            ));
        }
        if self.rpc.public_max_concurrency == 0 {
            return Err(invalid("rpc.public_max_concurrency", "must be at least 1"));
        }
        if let Some(url) = &self.rpc.url {
            parse_url(url)?;
        }
        parse_url(&self.rpc.local_url)?;
        parse_url(&self.rpc.public_url)?;
        for url in &self.rpc.fallback_urls {
            parse_url(url)?;
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(invalid("sync.poll_interval_secs", "must be at least 1"));
        }

        Ok(())
    }
}

/// Chain-native integer amount (wei) kept at full 256-bit precision.
///
/// Stored and displayed as a canonical base-10 string. Never converted to a
/// float or a 64-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(pub U256);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid decimal wei amount {0:?}")]
pub struct WeiParseError(pub String);

impl Wei {
    pub const ZERO: Wei = Wei(U256::ZERO);

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<U256> for Wei {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u128> for Wei {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // U256 displays in base 10
        write!(f, "{}", self.0)
    }
}

impl FromStr for Wei {
    type Err = WeiParseError;

    /// Accepts only canonical decimal text: digits, no sign, no separators,
    /// no leading zeros.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if !canonical {
            return Err(WeiParseError(s.to_string()));
        }
        U256::from_str_radix(s, 10)
            .map(Wei)
            .map_err(|_| WeiParseError(s.to_string()))
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A block that normalized cleanly, with its transactions in index order.
/// `logs` stays empty when receipts are not fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBlock {
    pub block: BlockRecord,
    pub transactions: Vec<TransactionRecord>,
    pub logs: Vec<LogRecord>,
}

/// A block left out of the ledger because its payload could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBlock {
    pub block_number: u64,
    pub reason: String,
}

impl From<MalformedDataError> for SkippedBlock {
    fn from(error: MalformedDataError) -> Self {
        Self {
            block_number: error.block_number,
            reason: error.reason,
        }
    }
}
