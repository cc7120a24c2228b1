//! The persistence capability the worker writes through.

use async_trait::async_trait;
use thiserror::Error;

use vmart_firestore::WatchProgressRepository;
use vmart_models::{ProgressKey, ProgressRecord};

/// Errors surfaced by a progress store.
///
/// Both variants are retried with bounded backoff at the flusher; the split
/// exists for logging and for operators reading the dead-letter list.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("rejected by store: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }
}

/// Upsert-capable durable store, keyed by `(videoId, userId)`.
///
/// The implementation owns its connection handling; the worker treats it as
/// a capability. Upserts are idempotent: the record carries the full state,
/// so replaying a write yields the same stored document.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn upsert(&self, key: &ProgressKey, record: &ProgressRecord) -> Result<(), StoreError>;
}

#[async_trait]
impl ProgressStore for WatchProgressRepository {
    async fn upsert(&self, key: &ProgressKey, record: &ProgressRecord) -> Result<(), StoreError> {
        WatchProgressRepository::upsert(self, &key.user_id, &key.video_id, record)
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    StoreError::unavailable(e.to_string())
                } else {
                    StoreError::rejected(e.to_string())
                }
            })
    }
}
