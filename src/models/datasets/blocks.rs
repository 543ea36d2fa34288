use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::datasets::transactions::RpcTransaction;

////////////////////////////////////// RPC Data ////////////////////////////////////////
///////////////////////////////// eth_getBlockByNumber /////////////////////////////////

/// Block as returned by `eth_getBlockByNumber(number, true)`.
///
/// Only the fields the ledger needs are decoded. Unknown fields (Avalanche
/// adds `blockExtraData`, `extDataHash`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(with = "alloy_serde::quantity")]
    pub number: u64,
    // Null for pending blocks
    #[serde(default)]
    pub hash: Option<B256>,
    #[serde(with = "alloy_serde::quantity")]
    pub timestamp: u64,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    #[serde(default)]
    pub transactions: RpcBlockTransactions,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RpcBlockTransactions {
    Full(Vec<RpcTransaction>),
    Hashes(Vec<B256>),
}

impl Default for RpcBlockTransactions {
    fn default() -> Self {
        RpcBlockTransactions::Full(Vec::new())
    }
}

impl RpcBlockTransactions {
    pub fn len(&self) -> usize {
        match self {
            RpcBlockTransactions::Full(txs) => txs.len(),
            RpcBlockTransactions::Hashes(hashes) => hashes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hashes(&self) -> Vec<B256> {
        match self {
            RpcBlockTransactions::Full(txs) => txs.iter().map(|tx| tx.hash).collect(),
            RpcBlockTransactions::Hashes(hashes) => hashes.clone(),
        }
    }
}

/////////////////////////////////// Transformed Data ///////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub gas_used: u64,
    pub transaction_count: u32,
}
