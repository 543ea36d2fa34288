use chrono::{DateTime, Utc};

use crate::models::datasets::blocks::{BlockRecord, RpcBlock};
use crate::models::errors::MalformedDataError;
use crate::utils::to_hex;

pub trait BlockTransformer {
    fn transform_block(&self) -> Result<BlockRecord, MalformedDataError>;
}

impl BlockTransformer for RpcBlock {
    fn transform_block(&self) -> Result<BlockRecord, MalformedDataError> {
        let hash = self
            .hash
            .ok_or_else(|| MalformedDataError::new(self.number, "missing block hash"))?;

        let transaction_count = u32::try_from(self.transactions.len()).map_err(|_| {
            MalformedDataError::new(
                self.number,
                format!("implausible transaction count {}", self.transactions.len()),
            )
        })?;

        Ok(BlockRecord {
            number: self.number,
            hash: to_hex(hash),
            timestamp: block_time(self.number, self.timestamp)?,
            gas_used: self.gas_used,
            transaction_count,
        })
    }
}

pub(crate) fn block_time(block_number: u64, timestamp: u64) -> Result<DateTime<Utc>, MalformedDataError> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| {
            MalformedDataError::new(block_number, format!("timestamp {timestamp} out of range"))
        })
}
