//! Backoff calculation for upsert retries.

use std::time::Duration;

use crate::config::FlusherConfig;

/// Delay before retry number `attempt` (1-based: 1 = delay after the first
/// failure). Exponential backoff with full jitter, floored at the base so a
/// degenerate jitter never produces a zero sleep.
pub fn backoff_delay(config: &FlusherConfig, attempt: u32) -> Duration {
    let base_ms = config.retry_base.as_millis() as u64;
    let max_ms = config.retry_max.as_millis() as u64;

    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(max_ms);

    // Full jitter from the subsecond clock, same trick the Firestore client
    // uses to avoid pulling in a rand dependency.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let factor = (nanos % 1000) as f64 / 1000.0;
    let jittered = ((capped as f64) * factor) as u64;

    Duration::from_millis(jittered.max(base_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_ms: u64, max_ms: u64) -> FlusherConfig {
        FlusherConfig {
            retry_base: Duration::from_millis(base_ms),
            retry_max: Duration::from_millis(max_ms),
            ..Default::default()
        }
    }

    #[test]
    fn delay_is_bounded() {
        let cfg = config(100, 1000);
        for attempt in 1..=10 {
            let d = backoff_delay(&cfg, attempt);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn delay_never_zero() {
        let cfg = config(50, 5000);
        assert!(backoff_delay(&cfg, 1) >= Duration::from_millis(50));
    }
}
