//! Watch-progress repository.
//!
//! One document per (user, video) pair at `users/{uid}/watchProgress/{vid}`.
//! Writes are upserts: the latest coalesced payload overwrites whatever is
//! stored, so replaying a flush is harmless.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use vmart_models::{ProgressRecord, UserId, VideoId};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::retry::with_retry;
use crate::types::{Document, FromFirestoreValue, ToFirestoreValue, Value};

/// Repository for watch-progress documents.
pub struct WatchProgressRepository {
    client: FirestoreClient,
}

impl WatchProgressRepository {
    /// Create a new watch-progress repository.
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Collection path: users/{user_id}/watchProgress
    fn collection_path(user_id: &UserId) -> String {
        format!("users/{}/watchProgress", user_id.as_str())
    }

    /// Create or overwrite the progress document for a (user, video) pair.
    pub async fn upsert(
        &self,
        user_id: &UserId,
        video_id: &VideoId,
        record: &ProgressRecord,
    ) -> FirestoreResult<()> {
        let collection = Self::collection_path(user_id);
        let fields = progress_record_to_fields(record);

        with_retry(self.client.retry_config(), "upsert_progress", || {
            let client = self.client.clone();
            let collection = collection.clone();
            let fields = fields.clone();
            async move {
                client
                    .set_document(&collection, video_id.as_str(), fields)
                    .await
            }
        })
        .await?;

        debug!(
            user_id = %user_id,
            video_id = %video_id,
            current_time = record.current_time,
            "Persisted watch progress"
        );

        Ok(())
    }

    /// Get the stored progress for a (user, video) pair.
    pub async fn get(
        &self,
        user_id: &UserId,
        video_id: &VideoId,
    ) -> FirestoreResult<Option<ProgressRecord>> {
        let collection = Self::collection_path(user_id);

        let doc = with_retry(self.client.retry_config(), "get_progress", || {
            let client = self.client.clone();
            let collection = collection.clone();
            async move { client.get_document(&collection, video_id.as_str()).await }
        })
        .await?;

        match doc {
            Some(d) => Ok(Some(document_to_progress_record(&d)?)),
            None => Ok(None),
        }
    }

    /// Delete the progress document for a (user, video) pair.
    pub async fn delete(&self, user_id: &UserId, video_id: &VideoId) -> FirestoreResult<()> {
        let collection = Self::collection_path(user_id);
        self.client
            .delete_document(&collection, video_id.as_str())
            .await
    }
}

// ============================================================================
// Field Conversion Helpers
// ============================================================================

fn progress_record_to_fields(record: &ProgressRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert(
        "currentTime".to_string(),
        record.current_time.to_firestore_value(),
    );
    fields.insert(
        "updatedAt".to_string(),
        record.updated_at.to_firestore_value(),
    );

    if let Some(duration) = record.duration {
        fields.insert("duration".to_string(), duration.to_firestore_value());
    }

    fields
}

fn document_to_progress_record(doc: &Document) -> FirestoreResult<ProgressRecord> {
    let fields = doc
        .fields
        .as_ref()
        .ok_or_else(|| FirestoreError::invalid_response("Document has no fields"))?;

    let current_time = fields
        .get("currentTime")
        .and_then(f64::from_firestore_value)
        .ok_or_else(|| FirestoreError::invalid_response("Document is missing currentTime"))?;

    let updated_at = fields
        .get("updatedAt")
        .and_then(DateTime::<Utc>::from_firestore_value)
        .unwrap_or_else(Utc::now);

    Ok(ProgressRecord {
        current_time,
        duration: fields.get("duration").and_then(f64::from_firestore_value),
        updated_at,
    })
}
