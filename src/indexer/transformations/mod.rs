pub mod blocks;
pub mod logs;
pub mod transactions;

use crate::models::common::NormalizedBlock;
use crate::models::datasets::blocks::RpcBlock;
use crate::models::errors::MalformedDataError;

pub use blocks::BlockTransformer;
pub use logs::LogTransformer;
pub use transactions::{ReceiptLookup, TransactionTransformer};

/// Converts a fetched block and its receipts into storage records.
///
/// Pure: no I/O. Wei amounts keep full precision and a missing `to` stays
/// `None`. Logs come from the receipts, in transaction order, and are absent
/// when receipts were skipped. Fails only when the payload is unusable, which
/// is fatal for this block alone.
pub fn normalize(raw: &RpcBlock, receipts: &ReceiptLookup) -> Result<NormalizedBlock, MalformedDataError> {
    let block = raw.transform_block()?;
    let transactions = raw.transform_transactions(&block, receipts)?;

    let mut logs = Vec::new();
    for hash in raw.transactions.hashes() {
        if let Some(receipt) = receipts.get(block.number, &hash)? {
            logs.extend(receipt.transform_logs(&block)?);
        }
    }

    Ok(NormalizedBlock {
        block,
        transactions,
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::Wei;
    use crate::models::datasets::blocks::RpcBlockTransactions;
    use crate::models::datasets::logs::RpcLog;
    use crate::models::datasets::transactions::{RpcReceipt, RpcTransaction, TxStatus};
    use alloy_primitives::{Address, B256, Bytes, U256};

    fn tx(block: u64, index: u64, value: U256, to: Option<Address>) -> RpcTransaction {
        RpcTransaction {
            hash: B256::with_last_byte(index as u8 + 1),
            block_number: Some(block),
            transaction_index: Some(index),
            from: Address::repeat_byte(0xaa),
            to,
            value,
            gas_price: Some(U256::from(25_000_000_000u64)),
            gas: 21_000,
            input: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
        }
    }

    fn block(number: u64, txs: Vec<RpcTransaction>) -> RpcBlock {
        RpcBlock {
            number,
            hash: Some(B256::repeat_byte(0x11)),
            timestamp: 1_700_000_000,
            gas_used: 42_000,
            transactions: RpcBlockTransactions::Full(txs),
        }
    }

    fn receipt(tx: &RpcTransaction, status: u64) -> RpcReceipt {
        RpcReceipt {
            transaction_hash: tx.hash,
            block_number: tx.block_number,
            status: Some(status),
            gas_used: 21_000,
            effective_gas_price: Some(U256::from(30_000_000_000u64)),
            logs: Vec::new(),
        }
    }

    fn log(tx: &RpcTransaction, log_index: u64, topics: usize) -> RpcLog {
        RpcLog {
            address: Address::repeat_byte(0xcc),
            topics: (0..topics).map(|i| B256::repeat_byte(0xe0 + i as u8)).collect(),
            data: Bytes::from(vec![0x01, 0x02]),
            log_index: Some(log_index),
            transaction_hash: Some(tx.hash),
            removed: false,
        }
    }

    #[test]
    fn test_normalize_keeps_full_precision() {
        let huge = U256::MAX - U256::from(7u8);
        let raw = block(7, vec![tx(7, 0, huge, Some(Address::repeat_byte(0xbb)))]);

        let normalized = normalize(&raw, &ReceiptLookup::Skipped).unwrap();
        let record = &normalized.transactions[0];

        assert_eq!(record.value, Wei(huge));
        assert_eq!(record.value.to_string().parse::<Wei>().unwrap(), Wei(huge));
        assert_eq!(record.gas_price.to_string(), "25000000000");
        assert_eq!(record.from_address, format!("0x{}", "aa".repeat(20)));
        assert_eq!(record.to_address, Some(format!("0x{}", "bb".repeat(20))));
        assert_eq!(record.input_data, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(record.timestamp, normalized.block.timestamp);

        assert_eq!(normalized.block.number, 7);
        assert_eq!(normalized.block.transaction_count, 1);
        assert_eq!(normalized.block.hash, format!("0x{}", "11".repeat(32)));
    }

    #[test]
    fn test_contract_creation_has_no_recipient() {
        let raw = block(1, vec![tx(1, 0, U256::ZERO, None)]);
        let normalized = normalize(&raw, &ReceiptLookup::Skipped).unwrap();
        assert_eq!(normalized.transactions[0].to_address, None);
    }

    #[test]
    fn test_skipped_receipts_leave_fields_unknown() {
        let raw = block(1, vec![tx(1, 0, U256::from(1u8), None)]);
        let normalized = normalize(&raw, &ReceiptLookup::Skipped).unwrap();
        assert_eq!(normalized.transactions[0].gas_used, None);
        assert_eq!(normalized.transactions[0].status, None);
    }

    #[test]
    fn test_receipts_supply_status_and_gas() {
        let first = tx(3, 0, U256::from(1u8), None);
        let second = tx(3, 1, U256::from(2u8), None);
        let receipts = ReceiptLookup::from_receipts(vec![receipt(&first, 1), receipt(&second, 0)]);
        let raw = block(3, vec![first, second]);

        let normalized = normalize(&raw, &receipts).unwrap();
        assert_eq!(normalized.transactions[0].status, Some(TxStatus::Success));
        assert_eq!(normalized.transactions[1].status, Some(TxStatus::Failure));
        assert_eq!(normalized.transactions[1].gas_used, Some(21_000));
    }

    #[test]
    fn test_gas_price_falls_back_to_receipt() {
        let mut dynamic_fee = tx(4, 0, U256::from(1u8), None);
        dynamic_fee.gas_price = None;
        let receipts = ReceiptLookup::from_receipts(vec![receipt(&dynamic_fee, 1)]);
        let raw = block(4, vec![dynamic_fee]);

        let normalized = normalize(&raw, &receipts).unwrap();
        assert_eq!(normalized.transactions[0].gas_price.to_string(), "30000000000");

        let err = normalize(&raw, &ReceiptLookup::Skipped).unwrap_err();
        assert!(err.reason.contains("missing gas price"));
    }

    #[test]
    fn test_malformed_blocks_are_rejected() {
        let mut pending = block(5, vec![]);
        pending.hash = None;
        let err = normalize(&pending, &ReceiptLookup::Skipped).unwrap_err();
        assert_eq!(err.block_number, 5);

        let mut hashes_only = block(6, vec![]);
        hashes_only.transactions = RpcBlockTransactions::Hashes(vec![B256::repeat_byte(1)]);
        let err = normalize(&hashes_only, &ReceiptLookup::Skipped).unwrap_err();
        assert!(err.reason.contains("only transaction hashes"));

        let mut far_future = block(7, vec![]);
        far_future.timestamp = u64::MAX;
        assert!(normalize(&far_future, &ReceiptLookup::Skipped).is_err());

        let misplaced = block(8, vec![tx(9, 0, U256::ZERO, None)]);
        let err = normalize(&misplaced, &ReceiptLookup::Skipped).unwrap_err();
        assert!(err.reason.contains("claims block 9"));
    }

    #[test]
    fn test_missing_or_foreign_receipts_are_rejected() {
        let first = tx(10, 0, U256::ZERO, None);
        let raw = block(10, vec![first.clone()]);

        let err = normalize(&raw, &ReceiptLookup::from_receipts(vec![])).unwrap_err();
        assert!(err.reason.contains("missing receipt"));

        let mut foreign = receipt(&first, 1);
        foreign.block_number = Some(11);
        let err = normalize(&raw, &ReceiptLookup::from_receipts(vec![foreign])).unwrap_err();
        assert!(err.reason.contains("belongs to block 11"));
    }

    #[test]
    fn test_missing_index_uses_position() {
        let mut first = tx(12, 0, U256::ZERO, None);
        first.transaction_index = None;
        let mut second = tx(12, 1, U256::ZERO, None);
        second.transaction_index = None;
        let normalized = normalize(&block(12, vec![first, second]), &ReceiptLookup::Skipped).unwrap();
        assert_eq!(normalized.transactions[1].tx_index, 1);
    }

    #[test]
    fn test_logs_follow_receipts() {
        let first = tx(20, 0, U256::ZERO, None);
        let second = tx(20, 1, U256::ZERO, None);
        let mut first_receipt = receipt(&first, 1);
        first_receipt.logs = vec![log(&first, 0, 3), log(&first, 1, 0)];
        let mut second_receipt = receipt(&second, 1);
        second_receipt.logs = vec![log(&second, 2, 4)];
        let receipts = ReceiptLookup::from_receipts(vec![second_receipt, first_receipt]);
        let raw = block(20, vec![first, second]);

        let normalized = normalize(&raw, &receipts).unwrap();
        let indexes: Vec<u64> = normalized.logs.iter().map(|l| l.log_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let transfer = &normalized.logs[0];
        assert_eq!(transfer.tx_hash, normalized.transactions[0].hash);
        assert_eq!(transfer.address, format!("0x{}", "cc".repeat(20)));
        assert_eq!(transfer.topic(0), Some(format!("0x{}", "e0".repeat(32)).as_str()));
        assert_eq!(transfer.topic(3), None);
        assert_eq!(transfer.timestamp, normalized.block.timestamp);
        assert!(normalized.logs[1].topics.is_empty());

        assert!(normalize(&raw, &ReceiptLookup::Skipped).unwrap().logs.is_empty());
    }

    #[test]
    fn test_unusable_logs_are_rejected() {
        let first = tx(21, 0, U256::ZERO, None);
        let raw = block(21, vec![first.clone()]);
        let with_log = |log: RpcLog| {
            let mut receipt = receipt(&first, 1);
            receipt.logs = vec![log];
            ReceiptLookup::from_receipts(vec![receipt])
        };

        let mut unindexed = log(&first, 0, 1);
        unindexed.log_index = None;
        let err = normalize(&raw, &with_log(unindexed)).unwrap_err();
        assert!(err.reason.contains("without index"));

        let err = normalize(&raw, &with_log(log(&first, 0, 5))).unwrap_err();
        assert!(err.reason.contains("5 topics"));

        let mut foreign = log(&first, 0, 1);
        foreign.transaction_hash = Some(B256::repeat_byte(0x99));
        assert!(normalize(&raw, &with_log(foreign)).is_err());

        let mut removed = log(&first, 0, 1);
        removed.removed = true;
        assert!(normalize(&raw, &with_log(removed)).is_err());
    }
}
