use thiserror::Error;

/// Failures reported by a session store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt session record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Session already exists: {0}")]
    Duplicate(String),
}

/// Failures that abort a query execution.
///
/// Either way, the outputs of the aborted execution are discarded.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Session store read failed: {0}")]
    Store(#[from] StoreError),

    #[error("Query was cancelled")]
    Cancelled,
}
