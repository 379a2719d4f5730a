//! v003 -- Tie person ratings to the transaction they were given for, so a
//! seller can rate the buyer of a completed sale exactly once.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE person_ratings ADD COLUMN transaction_id TEXT;   -- NULL for standalone ratings

CREATE UNIQUE INDEX IF NOT EXISTS idx_person_ratings_transaction
    ON person_ratings(transaction_id, rated_by);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
