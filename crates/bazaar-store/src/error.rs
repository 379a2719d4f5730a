use bazaar_shared::types::TransactionStatus;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The addressed user, product, transaction or profile does not exist.
    #[error("Record not found")]
    NotFound,

    /// A unique key (case-insensitive username) is already taken.
    #[error("Record already exists")]
    AlreadyExists,

    /// A stock decrement asked for more than is on the shelf.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// A transaction status change outside the legal transition set.
    #[error("Illegal transaction transition: {from} -> {to}")]
    IllegalTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// The acting user does not own the row or play the required role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Input that violates a column invariant (negative price, empty name...).
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Password hashing failure.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map a "no rows" error to [`StoreError::NotFound`].
pub(crate) fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}
