//! Flusher configuration.

use std::time::Duration;

/// Persistence flusher configuration.
#[derive(Debug, Clone)]
pub struct FlusherConfig {
    /// Maximum concurrent upserts (different keys only; the queue never
    /// hands the same key out twice)
    pub max_concurrent: usize,
    /// Attempt ceiling per task, including the first attempt. One attempt
    /// is one [`ProgressStore::upsert`] call; the Firestore-backed store
    /// runs its own bounded `FIRESTORE_RETRY_*` retries inside each call.
    ///
    /// [`ProgressStore::upsert`]: crate::store::ProgressStore::upsert
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub retry_base: Duration,
    /// Cap on the backoff delay
    pub retry_max: Duration,
    /// How long shutdown waits for in-flight upserts to drain
    pub shutdown_timeout: Duration,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_attempts: 3,
            retry_base: Duration::from_millis(200),
            retry_max: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl FlusherConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent: std::env::var("FLUSH_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            max_attempts: std::env::var("FLUSH_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3)
                .max(1),
            retry_base: Duration::from_millis(
                std::env::var("FLUSH_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(200),
            ),
            retry_max: Duration::from_millis(
                std::env::var("FLUSH_RETRY_MAX_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10_000),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("FLUSH_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
