//! v001 -- Initial schema creation.
//!
//! Creates the catalog and chat tables: `users`, `products`,
//! `product_owners` and `chat_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    username        TEXT PRIMARY KEY NOT NULL COLLATE NOCASE,
    password_hash   TEXT NOT NULL,                -- Argon2 PHC string
    display_name    TEXT NOT NULL,
    bio             TEXT NOT NULL DEFAULT '',
    profile_picture BLOB,
    created_at      TEXT NOT NULL                 -- RFC-3339
);

-- ----------------------------------------------------------------
-- Products, keyed by (product_name, seller)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS products (
    product_name TEXT NOT NULL,
    seller       TEXT NOT NULL COLLATE NOCASE,
    description  TEXT NOT NULL,
    price        REAL NOT NULL CHECK (price >= 0),
    quantity     INTEGER NOT NULL CHECK (quantity >= 0),
    rating       REAL NOT NULL DEFAULT 0,         -- running mean
    rating_count INTEGER NOT NULL DEFAULT 0,
    image        BLOB,
    created_at   TEXT NOT NULL,

    PRIMARY KEY (product_name, seller)
);

-- ----------------------------------------------------------------
-- Ownership index: which seller listed which product
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS product_owners (
    seller       TEXT NOT NULL COLLATE NOCASE,
    product_name TEXT NOT NULL,

    PRIMARY KEY (seller, product_name)
);

-- ----------------------------------------------------------------
-- Chat messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    sender    TEXT NOT NULL COLLATE NOCASE,
    receiver  TEXT NOT NULL COLLATE NOCASE,
    body      TEXT NOT NULL,
    timestamp TEXT NOT NULL,                      -- RFC-3339, microseconds
    is_read   INTEGER NOT NULL DEFAULT 0 CHECK (is_read IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_chat_receiver_unread
    ON chat_messages(receiver, is_read);
CREATE INDEX IF NOT EXISTS idx_chat_pair_ts
    ON chat_messages(sender, receiver, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
