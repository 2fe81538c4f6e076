use thiserror::Error;

/// Failures raised by the ledger store. Every variant is returned only after
/// the enclosing transaction has been rolled back.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt ledger data: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl StoreError {
    /// Map an insert failure, turning primary key collisions into conflicts.
    pub(crate) fn from_insert(err: sqlx::Error, what: impl std::fmt::Display) -> Self {
        match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(what.to_string())
            }
            other => StoreError::Unavailable(other),
        }
    }
}
