pub mod blocks;
pub mod logs;
pub mod transactions;
pub mod wallets;
