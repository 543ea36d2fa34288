//! Ledger tables. Applied on every open; each statement is idempotent.

pub const LAST_BLOCK_KEY: &str = "last_block";
pub const ORIGIN_BLOCK_KEY: &str = "origin_block";
pub const SYNC_TARGET_KEY: &str = "sync_target";

pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS blocks (
        block_number INTEGER PRIMARY KEY,
        block_hash   TEXT    NOT NULL,
        timestamp    TEXT    NOT NULL,
        gas_used     INTEGER NOT NULL,
        tx_count     INTEGER NOT NULL,
        indexed_at   TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        tx_hash      TEXT    PRIMARY KEY,
        block_number INTEGER NOT NULL REFERENCES blocks(block_number),
        tx_index     INTEGER NOT NULL,
        from_address TEXT    NOT NULL,
        to_address   TEXT,
        value        TEXT    NOT NULL,
        gas_price    TEXT    NOT NULL,
        gas_used     INTEGER,
        status       INTEGER,
        timestamp    TEXT    NOT NULL,
        input_data   BLOB    NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions(block_number, tx_index)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions(from_address)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions(to_address)",
    r#"
    CREATE TABLE IF NOT EXISTS event_logs (
        tx_hash      TEXT    NOT NULL REFERENCES transactions(tx_hash),
        log_index    INTEGER NOT NULL,
        block_number INTEGER NOT NULL REFERENCES blocks(block_number),
        address      TEXT    NOT NULL,
        topic0       TEXT,
        topic1       TEXT,
        topic2       TEXT,
        topic3       TEXT,
        data         BLOB    NOT NULL,
        timestamp    TEXT    NOT NULL,
        PRIMARY KEY (tx_hash, log_index)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_event_logs_block ON event_logs(block_number)",
    "CREATE INDEX IF NOT EXISTS idx_event_logs_address ON event_logs(address, topic0)",
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        address          TEXT    PRIMARY KEY,
        first_seen       TEXT    NOT NULL,
        last_active      TEXT    NOT NULL,
        total_txs        INTEGER NOT NULL,
        total_volume_wei TEXT    NOT NULL,
        updated_at       TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS indexer_state (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS skipped_blocks (
        block_number INTEGER PRIMARY KEY,
        reason       TEXT    NOT NULL,
        recorded_at  TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

pub const UPSERT_BLOCK: &str = r#"
    INSERT INTO blocks (block_number, block_hash, timestamp, gas_used, tx_count)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(block_number) DO UPDATE SET
        block_hash = excluded.block_hash,
        timestamp  = excluded.timestamp,
        gas_used   = excluded.gas_used,
        tx_count   = excluded.tx_count
"#;

pub const UPSERT_TRANSACTION: &str = r#"
    INSERT INTO transactions (
        tx_hash, block_number, tx_index, from_address, to_address,
        value, gas_price, gas_used, status, timestamp, input_data
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(tx_hash) DO UPDATE SET
        block_number = excluded.block_number,
        tx_index     = excluded.tx_index,
        from_address = excluded.from_address,
        to_address   = excluded.to_address,
        value        = excluded.value,
        gas_price    = excluded.gas_price,
        gas_used     = excluded.gas_used,
        status       = excluded.status,
        timestamp    = excluded.timestamp,
        input_data   = excluded.input_data
"#;

pub const UPSERT_LOG: &str = r#"
    INSERT INTO event_logs (
        tx_hash, log_index, block_number, address,
        topic0, topic1, topic2, topic3, data, timestamp
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(tx_hash, log_index) DO UPDATE SET
        block_number = excluded.block_number,
        address      = excluded.address,
        topic0       = excluded.topic0,
        topic1       = excluded.topic1,
        topic2       = excluded.topic2,
        topic3       = excluded.topic3,
        data         = excluded.data,
        timestamp    = excluded.timestamp
"#;

pub const SELECT_LOGS: &str = r#"
    SELECT tx_hash, log_index, block_number, address,
           topic0, topic1, topic2, topic3, data, timestamp
    FROM event_logs WHERE tx_hash = ? ORDER BY log_index
"#;

/// Addresses on the rows about to be replaced for one block.
pub const SELECT_BLOCK_ADDRESSES: &str =
    "SELECT from_address, to_address FROM transactions WHERE block_number = ?";

/// A self-transfer matches once.
pub const SELECT_WALLET_ACTIVITY: &str =
    "SELECT timestamp, value FROM transactions WHERE from_address = ? OR to_address = ?";

pub const UPSERT_WALLET: &str = r#"
    INSERT INTO wallets (address, first_seen, last_active, total_txs, total_volume_wei)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(address) DO UPDATE SET
        first_seen       = excluded.first_seen,
        last_active      = excluded.last_active,
        total_txs        = excluded.total_txs,
        total_volume_wei = excluded.total_volume_wei,
        updated_at       = CURRENT_TIMESTAMP
"#;

pub const DELETE_WALLET: &str = "DELETE FROM wallets WHERE address = ?";

pub const SELECT_WALLET: &str = r#"
    SELECT address, first_seen, last_active, total_txs, total_volume_wei
    FROM wallets WHERE address = ?
"#;

pub const BLOCK_EXISTS: &str = "SELECT 1 FROM blocks WHERE block_number = ?";

pub const UPSERT_SKIPPED: &str = r#"
    INSERT INTO skipped_blocks (block_number, reason)
    VALUES (?, ?)
    ON CONFLICT(block_number) DO UPDATE SET
        reason      = excluded.reason,
        recorded_at = CURRENT_TIMESTAMP
"#;

pub const CLEAR_SKIPPED: &str = "DELETE FROM skipped_blocks WHERE block_number = ?";

pub const UPSERT_STATE: &str = r#"
    INSERT INTO indexer_state (key, value)
    VALUES (?, ?)
    ON CONFLICT(key) DO UPDATE SET
        value      = excluded.value,
        updated_at = CURRENT_TIMESTAMP
"#;

pub const SELECT_STATE: &str = "SELECT value FROM indexer_state WHERE key = ?";

pub const SELECT_BLOCK: &str = r#"
    SELECT block_number, block_hash, timestamp, gas_used, tx_count
    FROM blocks WHERE block_number = ?
"#;

pub const SELECT_TRANSACTION: &str = r#"
    SELECT tx_hash, block_number, tx_index, from_address, to_address,
           value, gas_price, gas_used, status, timestamp, input_data
    FROM transactions WHERE tx_hash = ?
"#;
