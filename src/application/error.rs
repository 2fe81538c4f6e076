use thiserror::Error;

use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AppError {
    /// Failures the maintenance loop waits out until the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::StoreUnavailable(_))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(what) => AppError::Conflict(what),
            StoreError::Corrupt(_) | StoreError::Unavailable(_) => {
                AppError::StoreUnavailable(err.to_string())
            }
        }
    }
}
