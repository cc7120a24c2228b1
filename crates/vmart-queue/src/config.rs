//! Queue configuration.

use std::str::FromStr;
use std::time::Duration;

/// Fire-time policy applied when a pending key is re-enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    /// Restart the delay window on every enqueue. The task fires only after
    /// a quiet period, so the final position within any window is the only
    /// one persisted.
    #[default]
    Debounce,
    /// Keep the original fire time. Sustained streaming still flushes at a
    /// fixed interval instead of being pushed out indefinitely.
    Throttle,
}

impl FromStr for CoalescePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debounce" => Ok(Self::Debounce),
            "throttle" => Ok(Self::Throttle),
            other => Err(format!("unknown coalesce policy: {}", other)),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Delay between the last qualifying enqueue and task firing
    pub flush_delay: Duration,
    /// Fire-time policy on re-enqueue
    pub policy: CoalescePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_secs(30),
            policy: CoalescePolicy::Debounce,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            flush_delay: Duration::from_secs(
                std::env::var("PROGRESS_FLUSH_DELAY_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            policy: std::env::var("PROGRESS_COALESCE_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }
}
