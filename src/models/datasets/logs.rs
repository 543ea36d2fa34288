use alloy_primitives::{Address, B256, Bytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

////////////////////////////////////// RPC Data ////////////////////////////////////////
////////////////////////////// eth_getTransactionReceipt ///////////////////////////////

/// Event log as embedded in a receipt's `logs` array.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    // Position within the block, not the transaction
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub log_index: Option<u64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub removed: bool,
}

/////////////////////////////////// Transformed Data ///////////////////////////////////

/// Most topics an EVM log can carry (LOG0..LOG4).
pub const MAX_TOPICS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub address: String,
    /// `topics[0]` is the event signature for non-anonymous events
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn topic(&self, position: usize) -> Option<&str> {
        self.topics.get(position).map(String::as_str)
    }
}
