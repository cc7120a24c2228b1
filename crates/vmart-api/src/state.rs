//! Application state.

use std::sync::Arc;

use vmart_firestore::{FirestoreClient, WatchProgressRepository};
use vmart_queue::{CoalescingDelayQueue, DeadLetterList};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub firestore: Arc<FirestoreClient>,
    pub progress: Arc<WatchProgressRepository>,
    pub queue: Arc<CoalescingDelayQueue>,
    pub dead_letters: Arc<DeadLetterList>,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let firestore = Arc::new(FirestoreClient::from_env().await?);
        let progress = Arc::new(WatchProgressRepository::new((*firestore).clone()));
        let queue = Arc::new(CoalescingDelayQueue::from_env());

        Ok(Self {
            config,
            firestore,
            progress,
            queue,
            dead_letters: Arc::new(DeadLetterList::new()),
        })
    }
}
