//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Flusher stopped: {0}")]
    Stopped(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

impl WorkerError {
    pub fn stopped(msg: impl Into<String>) -> Self {
        Self::Stopped(msg.into())
    }
}
