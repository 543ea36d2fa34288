use crate::models::datasets::blocks::BlockRecord;
use crate::models::datasets::logs::{LogRecord, MAX_TOPICS};
use crate::models::datasets::transactions::RpcReceipt;
use crate::models::errors::MalformedDataError;
use crate::utils::to_hex;

pub trait LogTransformer {
    fn transform_logs(&self, block: &BlockRecord) -> Result<Vec<LogRecord>, MalformedDataError>;
}

impl LogTransformer for RpcReceipt {
    fn transform_logs(&self, block: &BlockRecord) -> Result<Vec<LogRecord>, MalformedDataError> {
        let tx_hash = self.transaction_hash;

        self.logs
            .iter()
            .map(|log| {
                // (tx_hash, log_index) is the storage key, so both must be known
                let log_index = log.log_index.ok_or_else(|| {
                    MalformedDataError::new(block.number, format!("log without index in transaction {tx_hash}"))
                })?;

                if let Some(owner) = log.transaction_hash.filter(|owner| *owner != tx_hash) {
                    return Err(MalformedDataError::new(
                        block.number,
                        format!("log {log_index} of transaction {tx_hash} claims transaction {owner}"),
                    ));
                }
                if log.removed {
                    return Err(MalformedDataError::new(
                        block.number,
                        format!("log {log_index} of transaction {tx_hash} is marked removed"),
                    ));
                }
                if log.topics.len() > MAX_TOPICS {
                    return Err(MalformedDataError::new(
                        block.number,
                        format!("log {log_index} carries {} topics", log.topics.len()),
                    ));
                }

                Ok(LogRecord {
                    tx_hash: to_hex(tx_hash),
                    log_index,
                    block_number: block.number,
                    address: to_hex(log.address),
                    topics: log.topics.iter().map(to_hex).collect(),
                    data: log.data.to_vec(),
                    timestamp: block.timestamp,
                })
            })
            .collect()
    }
}
