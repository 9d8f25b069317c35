//! Mirror store error types.

/// Errors produced by [`MirrorStore`](crate::MirrorStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored attributes could not be encoded or decoded.
    #[error("attribute encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("mirror store lock poisoned")]
    LockPoisoned,

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {column} on table {table}")]
    UnknownColumn { table: String, column: String },

    /// Table and column names are interpolated into SQL and must be plain identifiers.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;
