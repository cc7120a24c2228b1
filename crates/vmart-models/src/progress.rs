//! Watch-progress events, keys, and durable records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{UserId, VideoId};

/// Inbound progress event as received over the ingress channel.
///
/// All fields are optional at the wire level so that malformed payloads
/// deserialize and are rejected with a precise reason by [`ProgressEvent::validate`]
/// instead of an opaque parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Video being watched
    #[serde(default)]
    pub video_id: Option<String>,
    /// Viewing user
    #[serde(default)]
    pub user_id: Option<String>,
    /// Playback position in seconds (0 is a valid position)
    #[serde(default)]
    pub current_time: Option<f64>,
    /// Total video length in seconds, if the player knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl ProgressEvent {
    /// Build a well-formed event. Used by tests and internal callers.
    pub fn new(
        video_id: impl Into<String>,
        user_id: impl Into<String>,
        current_time: f64,
    ) -> Self {
        Self {
            video_id: Some(video_id.into()),
            user_id: Some(user_id.into()),
            current_time: Some(current_time),
            duration: None,
        }
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Validate the event. Pure: no side effects, no clamping.
    ///
    /// `currentTime = 0` is a valid position and must not be treated as
    /// missing. `duration` passes through unchanged when present.
    pub fn validate(self) -> Result<ValidatedEvent, RejectionReason> {
        let video_id = match self.video_id {
            Some(v) if !v.trim().is_empty() => VideoId(v),
            _ => return Err(RejectionReason::MissingVideoId),
        };
        let user_id = match self.user_id {
            Some(u) if !u.trim().is_empty() => UserId(u),
            _ => return Err(RejectionReason::MissingUserId),
        };
        let current_time = match self.current_time {
            Some(t) if t.is_finite() && t >= 0.0 => t,
            Some(t) => return Err(RejectionReason::InvalidCurrentTime(t)),
            None => return Err(RejectionReason::MissingCurrentTime),
        };

        Ok(ValidatedEvent {
            video_id,
            user_id,
            current_time,
            duration: self.duration,
        })
    }
}

/// A progress event that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedEvent {
    pub video_id: VideoId,
    pub user_id: UserId,
    pub current_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl ValidatedEvent {
    /// Composite key identifying the at-most-one pending task for this event.
    pub fn key(&self) -> ProgressKey {
        ProgressKey {
            video_id: self.video_id.clone(),
            user_id: self.user_id.clone(),
        }
    }

    /// Snapshot this event into a durable record, stamped now.
    pub fn to_record(&self) -> ProgressRecord {
        ProgressRecord {
            current_time: self.current_time,
            duration: self.duration,
            updated_at: Utc::now(),
        }
    }
}

/// Why an inbound event was rejected. `Display` is the client-facing message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    #[error("videoId is required")]
    MissingVideoId,

    #[error("userId is required")]
    MissingUserId,

    #[error("currentTime is required")]
    MissingCurrentTime,

    #[error("currentTime must be a non-negative number, got {0}")]
    InvalidCurrentTime(f64),
}

/// Composite `(video, user)` key. At most one delayed task exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressKey {
    pub video_id: VideoId,
    pub user_id: UserId,
}

impl ProgressKey {
    pub fn new(video_id: impl Into<VideoId>, user_id: impl Into<UserId>) -> Self {
        Self {
            video_id: video_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for ProgressKey {
    /// The delayed-job identifier form, `"{videoId}:{userId}"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.video_id, self.user_id)
    }
}

/// Durable watch-progress record, keyed by `(videoId, userId)` in the store.
///
/// Upsert semantics: created on first write, overwritten after. No history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub current_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub updated_at: DateTime<Utc>,
}
