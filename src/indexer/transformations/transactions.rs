use alloy_primitives::B256;
use std::collections::HashMap;

use crate::models::common::Wei;
use crate::models::datasets::blocks::{BlockRecord, RpcBlock, RpcBlockTransactions};
use crate::models::datasets::transactions::{RpcReceipt, TransactionRecord, TxStatus};
use crate::models::errors::MalformedDataError;
use crate::utils::to_hex;

/// Receipts available for one block, keyed by transaction hash.
#[derive(Debug, Clone, Default)]
pub enum ReceiptLookup {
    /// Receipts were not requested; receipt-derived fields stay unknown
    #[default]
    Skipped,
    Fetched(HashMap<B256, RpcReceipt>),
}

impl ReceiptLookup {
    pub fn from_receipts(receipts: Vec<RpcReceipt>) -> Self {
        ReceiptLookup::Fetched(
            receipts
                .into_iter()
                .map(|receipt| (receipt.transaction_hash, receipt))
                .collect(),
        )
    }

    pub(crate) fn get(&self, block_number: u64, hash: &B256) -> Result<Option<&RpcReceipt>, MalformedDataError> {
        match self {
            ReceiptLookup::Skipped => Ok(None),
            ReceiptLookup::Fetched(receipts) => {
                let receipt = receipts.get(hash).ok_or_else(|| {
                    MalformedDataError::new(block_number, format!("missing receipt for transaction {hash}"))
                })?;
                match receipt.block_number {
                    Some(number) if number != block_number => Err(MalformedDataError::new(
                        block_number,
                        format!("receipt for transaction {hash} belongs to block {number}"),
                    )),
                    _ => Ok(Some(receipt)),
                }
            }
        }
    }
}

pub trait TransactionTransformer {
    fn transform_transactions(
        &self,
        block: &BlockRecord,
        receipts: &ReceiptLookup,
    ) -> Result<Vec<TransactionRecord>, MalformedDataError>;
}

impl TransactionTransformer for RpcBlock {
    fn transform_transactions(
        &self,
        block: &BlockRecord,
        receipts: &ReceiptLookup,
    ) -> Result<Vec<TransactionRecord>, MalformedDataError> {
        let transactions = match &self.transactions {
            RpcBlockTransactions::Full(transactions) => transactions,
            RpcBlockTransactions::Hashes(_) => {
                return Err(MalformedDataError::new(
                    self.number,
                    "expected full transaction objects but received only transaction hashes",
                ));
            }
        };

        transactions
            .iter()
            .enumerate()
            .map(|(position, tx)| {
                match tx.block_number {
                    Some(number) if number != self.number => {
                        return Err(MalformedDataError::new(
                            self.number,
                            format!("transaction {} claims block {number}", tx.hash),
                        ));
                    }
                    _ => {}
                }

                let receipt = receipts.get(self.number, &tx.hash)?;

                // Legacy and access-list transactions carry gasPrice directly,
                // otherwise the receipt's effective price is the one paid
                let gas_price = tx
                    .gas_price
                    .or_else(|| receipt.and_then(|r| r.effective_gas_price))
                    .ok_or_else(|| {
                        MalformedDataError::new(
                            self.number,
                            format!("missing gas price for transaction {}", tx.hash),
                        )
                    })?;

                let status = match receipt.and_then(|r| r.status) {
                    Some(code) => Some(TxStatus::from_receipt(code).ok_or_else(|| {
                        MalformedDataError::new(
                            self.number,
                            format!("unknown receipt status {code} for transaction {}", tx.hash),
                        )
                    })?),
                    None => None,
                };

                Ok(TransactionRecord {
                    hash: to_hex(tx.hash),
                    block_number: self.number,
                    tx_index: tx.transaction_index.unwrap_or(position as u64),
                    from_address: to_hex(tx.from),
                    to_address: tx.to.map(to_hex),
                    value: Wei(tx.value),
                    gas_price: Wei(gas_price),
                    gas_used: receipt.map(|r| r.gas_used),
                    status,
                    timestamp: block.timestamp,
                    input_data: tx.input.to_vec(),
                })
            })
            .collect()
    }
}
