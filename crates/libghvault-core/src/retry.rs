//! Bounded exponential-backoff retry
//!
//! Applied explicitly around transient-failure-prone operations (git
//! transport, API calls). Filesystem and validation steps are never
//! wrapped; their failures are permanent for the run.

use std::time::Duration;

use tracing::warn;

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff_factor,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op`, retrying while `is_transient` approves the error.
    ///
    /// The last error is surfaced once retries are exhausted or the
    /// error is classified as permanent.
    pub fn execute<T, E>(
        &self,
        op: impl FnMut() -> Result<T, E>,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
    {
        self.execute_with_sleep(op, is_transient, std::thread::sleep)
    }

    /// Same as [`execute`](Self::execute) with an injectable sleep, so tests
    /// can observe the backoff schedule without waiting it out.
    pub fn execute_with_sleep<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
        is_transient: impl Fn(&E) -> bool,
        mut sleep: impl FnMut(Duration),
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && is_transient(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying: {}",
                        err
                    );
                    sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
