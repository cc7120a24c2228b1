//! Dead-letter surface for tasks that exhausted their retries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::error;

use vmart_models::{ProgressKey, ValidatedEvent};

/// A task that failed permanently, held for operator remediation.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub key: ProgressKey,
    pub payload: ValidatedEvent,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Inspectable list of dead-lettered tasks.
///
/// There is no automatic replay: entries stay until an operator intervenes.
#[derive(Default)]
pub struct DeadLetterList {
    entries: RwLock<Vec<DeadLetter>>,
}

impl DeadLetterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a permanently failed task. Logged at error level so it reaches
    /// the operator channel.
    pub async fn push(&self, key: ProgressKey, payload: ValidatedEvent, err: String, attempts: u32) {
        error!(key = %key, attempts, error = %err, "task moved to dead-letter list");
        self.entries.write().await.push(DeadLetter {
            key,
            payload,
            error: err,
            attempts,
            failed_at: Utc::now(),
        });
    }

    /// Snapshot of all entries, oldest first.
    pub async fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use vmart_models::ProgressEvent;

    use super::*;

    #[tokio::test]
    async fn push_and_snapshot() {
        let list = DeadLetterList::new();
        let event = ProgressEvent::new("v1", "u1", 3.0).validate().unwrap();
        list.push(event.key(), event, "store unavailable".into(), 3).await;

        let entries = list.snapshot().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 3);
        assert_eq!(entries[0].key, ProgressKey::new("v1", "u1"));
    }
}
