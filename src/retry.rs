//! Bounded retry with exponential backoff for collaborator calls.
//!
//! Only collaborators whose operations are idempotent from the core's point of
//! view (notification delivery, pool setup) receive a policy. Lifecycle
//! transitions themselves are never retried here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Delay never grows beyond this, whatever the attempt count.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Retry policy handed to a collaborator at construction time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; zero is treated as one.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: true,
        }
    }

    /// A policy that calls the operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Disable jitter so delays are exact (useful in tests).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(MAX_DELAY);
        if self.jitter && !delay.is_zero() {
            // Up to 25% extra so concurrent callers do not retry in lockstep.
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }

    /// Longest total sleep between attempts, jitter included.
    pub fn max_total_backoff(&self) -> Duration {
        (0..self.max_attempts - 1)
            .map(|attempt| {
                let delay = self
                    .base_delay
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(MAX_DELAY);
                if self.jitter {
                    delay + delay / 4
                } else {
                    delay
                }
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Per-attempt timeout such that every attempt plus the backoff between
    /// them fits within `budget`.
    pub fn attempt_timeout_within(&self, budget: Duration) -> Duration {
        let for_attempts = budget
            .checked_sub(self.max_total_backoff())
            .filter(|left| !left.is_zero())
            .unwrap_or(budget);
        for_attempts / self.max_attempts
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, E, F, Fut, R>(&self, what: &str, should_retry: R, op: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !should_retry(&err) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        "call failed, retrying in {delay:?}: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}
