use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::common::Wei;

/////////////////////////////////// Transformed Data ///////////////////////////////////

/// Activity of one address across every indexed transaction it sent or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletRecord {
    pub address: String,
    pub first_seen: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// A self-transfer counts once
    pub total_txs: u64,
    /// Value sent plus value received, saturating at the u256 maximum
    pub total_volume: Wei,
}

impl WalletRecord {
    /// Folds `(timestamp, value)` pairs for every transaction touching
    /// `address`. `None` when there are none.
    pub fn from_activity<I>(address: impl Into<String>, activity: I) -> Option<Self>
    where
        I: IntoIterator<Item = (DateTime<Utc>, Wei)>,
    {
        let mut activity = activity.into_iter();
        let (timestamp, value) = activity.next()?;

        let mut wallet = WalletRecord {
            address: address.into(),
            first_seen: timestamp,
            last_active: timestamp,
            total_txs: 1,
            total_volume: value,
        };
        for (timestamp, value) in activity {
            wallet.first_seen = wallet.first_seen.min(timestamp);
            wallet.last_active = wallet.last_active.max(timestamp);
            wallet.total_txs += 1;
            wallet.total_volume = Wei(wallet.total_volume.0.saturating_add(value.0));
        }
        Some(wallet)
    }
}
