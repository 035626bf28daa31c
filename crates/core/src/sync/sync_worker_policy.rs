//! Scheduling policy for the background sync worker.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::SYNC_MAX_RETRIES;

/// Base wake interval of the sync worker.
pub const SYNC_BASE_INTERVAL_SECS: u64 = 30;

/// Upper bound of the backed-off wake interval.
pub const SYNC_MAX_INTERVAL_SECS: u64 = 300;

/// Queue rows replayed per cycle.
pub const SYNC_BATCH_SIZE: i64 = 50;

/// How long `stop` waits for the loop before giving up on it.
pub const SYNC_STOP_TIMEOUT_SECS: u64 = 10;

/// Retry policy classification for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Classify HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> SyncRetryClass {
    match status {
        401 | 403 => SyncRetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => SyncRetryClass::Retryable,
        500..=599 => SyncRetryClass::Retryable,
        _ => SyncRetryClass::Permanent,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWorkerConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub batch_size: i64,
    pub max_retries: u32,
    pub stop_timeout: Duration,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(SYNC_BASE_INTERVAL_SECS),
            max_interval: Duration::from_secs(SYNC_MAX_INTERVAL_SECS),
            batch_size: SYNC_BATCH_SIZE,
            max_retries: SYNC_MAX_RETRIES,
            stop_timeout: Duration::from_secs(SYNC_STOP_TIMEOUT_SECS),
        }
    }
}

/// Sleep interval between worker cycles.
///
/// Doubles after every cycle that synced nothing (empty, skipped or failed),
/// never exceeds `max`, and drops back to `base` as soon as a row syncs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl SyncBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn from_config(config: &SyncWorkerConfig) -> Self {
        Self::new(config.base_interval, config.max_interval)
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn record_idle(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }

    pub fn reset(&mut self) -> Duration {
        self.current = self.base;
        self.current
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleOutcome {
    pub skipped_offline: bool,
    pub selected: usize,
    pub synced: usize,
    pub failed: usize,
}

impl SyncCycleOutcome {
    pub fn offline() -> Self {
        Self {
            skipped_offline: true,
            ..Self::default()
        }
    }

    pub fn made_progress(&self) -> bool {
        self.synced > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_http_status_for_retry_policy() {
        assert_eq!(classify_http_status(500), SyncRetryClass::Retryable);
        assert_eq!(classify_http_status(429), SyncRetryClass::Retryable);
        assert_eq!(classify_http_status(401), SyncRetryClass::ReauthRequired);
        assert_eq!(classify_http_status(400), SyncRetryClass::Permanent);
    }

    #[test]
    fn backoff_is_non_decreasing_and_capped() {
        let mut backoff = SyncBackoff::from_config(&SyncWorkerConfig::default());
        assert_eq!(backoff.current(), Duration::from_secs(30));

        let mut previous = backoff.current();
        let mut seen = Vec::new();
        for _ in 0..10 {
            let next = backoff.record_idle();
            assert!(next >= previous);
            assert!(next <= Duration::from_secs(300));
            seen.push(next.as_secs());
            previous = next;
        }
        assert_eq!(&seen[..4], &[60, 120, 240, 300]);
        assert_eq!(backoff.current(), Duration::from_secs(300));
    }

    #[test]
    fn success_resets_to_base() {
        let mut backoff = SyncBackoff::new(Duration::from_secs(30), Duration::from_secs(300));
        backoff.record_idle();
        backoff.record_idle();
        assert_eq!(backoff.reset(), Duration::from_secs(30));
    }

    #[test]
    fn max_below_base_is_clamped_to_base() {
        let mut backoff = SyncBackoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.record_idle(), Duration::from_secs(10));
    }
}
