use alloy_primitives::{Address, B256, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::common::Wei;
use crate::models::datasets::logs::RpcLog;

////////////////////////////////////// RPC Data ////////////////////////////////////////
///////////////////////////////// eth_getBlockByNumber /////////////////////////////////

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub block_number: Option<u64>,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub transaction_index: Option<u64>,
    pub from: Address,
    // None for contract creation
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(with = "alloy_serde::quantity")]
    pub gas: u64,
    #[serde(default)]
    pub input: Bytes,
}

///////////////////////////// eth_getTransactionReceipt ////////////////////////////////

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub block_number: Option<u64>,
    // Absent on pre-Byzantium receipts, which carry a state root instead
    #[serde(default, with = "alloy_serde::quantity::opt")]
    pub status: Option<u64>,
    #[serde(with = "alloy_serde::quantity")]
    pub gas_used: u64,
    #[serde(default)]
    pub effective_gas_price: Option<U256>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

/////////////////////////////////// Transformed Data ///////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failure,
}

impl TxStatus {
    pub fn from_receipt(status: u64) -> Option<Self> {
        match status {
            1 => Some(TxStatus::Success),
            0 => Some(TxStatus::Failure),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            TxStatus::Success => 1,
            TxStatus::Failure => 0,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(TxStatus::Success),
            0 => Some(TxStatus::Failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub hash: String,
    pub block_number: u64,
    pub tx_index: u64,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: Wei,
    pub gas_price: Wei,
    // Receipt-derived; None when receipts are not fetched
    pub gas_used: Option<u64>,
    pub status: Option<TxStatus>,
    pub timestamp: DateTime<Utc>,
    pub input_data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_receipt() {
        let json = r#"{
            "transactionHash": "0x3333333333333333333333333333333333333333333333333333333333333333",
            "blockNumber": "0x2a",
            "status": "0x0",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x5d21dba00",
            "logs": []
        }"#;
        let receipt: RpcReceipt = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.block_number, Some(42));
        assert_eq!(receipt.status.and_then(TxStatus::from_receipt), Some(TxStatus::Failure));
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.effective_gas_price, Some(U256::from(25_000_000_000u64)));
        assert!(receipt.logs.is_empty());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TxStatus::from_receipt(1), Some(TxStatus::Success));
        assert_eq!(TxStatus::from_receipt(7), None);
        assert_eq!(TxStatus::from_i64(TxStatus::Failure.as_i64()), Some(TxStatus::Failure));
    }
}
