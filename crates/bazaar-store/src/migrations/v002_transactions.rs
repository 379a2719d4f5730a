use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Purchase transactions
CREATE TABLE IF NOT EXISTS transactions (
    id         TEXT PRIMARY KEY NOT NULL,      -- 8-char token
    buyer      TEXT NOT NULL COLLATE NOCASE,
    seller     TEXT NOT NULL COLLATE NOCASE,
    product    TEXT NOT NULL,
    date       TEXT NOT NULL,                  -- agreed pickup date
    quantity   INTEGER NOT NULL CHECK (quantity >= 1),
    status     TEXT NOT NULL DEFAULT 'pending'
               CHECK (status IN ('pending', 'approved', 'declined', 'completed')),
    origin     TEXT NOT NULL DEFAULT 'explicit'
               CHECK (origin IN ('explicit', 'chat', 'direct')),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_parties ON transactions(buyer, seller);

-- Sales ledger (append-only)
CREATE TABLE IF NOT EXISTS purchases (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    seller       TEXT NOT NULL COLLATE NOCASE,
    product_name TEXT NOT NULL,
    buyer        TEXT NOT NULL COLLATE NOCASE,
    recorded_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_purchases_seller ON purchases(seller);

-- Product ratings ledger (append-only)
CREATE TABLE IF NOT EXISTS product_ratings (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    product_name TEXT NOT NULL,
    seller       TEXT NOT NULL COLLATE NOCASE,
    buyer        TEXT NOT NULL COLLATE NOCASE,
    rating       INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    created_at   TEXT NOT NULL
);

-- Person ratings ledger (append-only)
CREATE TABLE IF NOT EXISTS person_ratings (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    rated_user TEXT NOT NULL COLLATE NOCASE,
    rating     INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    rated_by   TEXT NOT NULL COLLATE NOCASE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_person_ratings_user ON person_ratings(rated_user);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
