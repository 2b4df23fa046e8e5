//! API rate-budget gating
//!
//! Consults the provider's reported remaining quota before an API call
//! and converts low-budget situations into a bounded wait. Never fails
//! an operation by itself.

use std::time::Duration;

use tracing::warn;

/// Remaining quota as reported by the API provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    /// Calls left in the current window
    pub remaining: u64,
    /// Unix timestamp (seconds) when the window resets
    pub reset_epoch: u64,
}

/// Gate for API calls based on remaining rate budget
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Wait when remaining quota drops below this
    threshold: u64,
    /// Cap on a single imposed wait
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(threshold: u64, max_wait: Duration) -> Self {
        Self { threshold, max_wait }
    }

    /// Wait required before the next call, if any.
    ///
    /// Pure computation against a caller-supplied clock so the schedule
    /// is testable.
    pub fn wait_needed(&self, quota: &RateQuota, now_epoch: u64) -> Option<Duration> {
        if quota.remaining >= self.threshold {
            return None;
        }
        let until_reset = quota.reset_epoch.saturating_sub(now_epoch);
        if until_reset == 0 {
            // Window already rolled over; the next probe sees fresh budget
            return None;
        }
        Some(Duration::from_secs(until_reset).min(self.max_wait))
    }

    /// Block the calling unit until the budget allows another call.
    ///
    /// A missing quota reading (probe failed) is treated as permission to
    /// proceed; the limiter only ever delays.
    pub fn gate(&self, quota: Option<&RateQuota>) {
        let Some(quota) = quota else { return };
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if let Some(wait) = self.wait_needed(quota, now) {
            warn!(
                remaining = quota.remaining,
                wait_secs = wait.as_secs(),
                "API rate budget low, waiting for reset"
            );
            std::thread::sleep(wait);
        }
    }
}
