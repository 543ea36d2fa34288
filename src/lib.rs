//! Avalanche C-Chain block and transaction indexer.
//!
//! Pulls blocks, transactions and receipts over JSON-RPC into a SQLite
//! ledger with idempotent writes and a contiguous checkpoint.

pub mod indexer;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod utils;

pub use indexer::{Indexer, RunSummary};
pub use models::common::Config;
pub use storage::{LedgerStore, SqliteStore};
