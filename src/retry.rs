//! Retry policy with exponential backoff
//!
//! Workers retry transient backend failures transparently. The delay curve is
//! `initial_delay * backoff_multiplier^n`, capped at `max_delay`, with
//! optional jitter to avoid hammering a platform from several tasks at once.
//! A multiplier of `1.0` turns this into a fixed delay.
//!
//! # Example
//!
//! ```
//! use taskdl::config::RetryConfig;
//! use taskdl::retry::Backoff;
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     max_attempts: 2,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(1),
//!     backoff_multiplier: 2.0,
//!     jitter: false,
//! };
//! let mut backoff = Backoff::new(&config);
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
//! assert_eq!(backoff.next_delay(), None);
//! ```

use crate::config::RetryConfig;
use crate::error::{BackendError, BackendErrorKind};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection reset, remote busy) should return `true`.
/// Permanent failures (bad response shape, disk full) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self.kind {
            BackendErrorKind::Network => true,
            // A changed API or a broken disk will not fix itself
            BackendErrorKind::Parse | BackendErrorKind::Filesystem => false,
            // Unknown errors - be conservative and don't retry
            BackendErrorKind::Unknown => false,
        }
    }
}

/// Delay schedule for one task's retries
#[derive(Debug, Clone)]
pub struct Backoff {
    remaining: u32,
    delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a fresh schedule from the config
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            remaining: config.max_attempts,
            delay: config.initial_delay.min(config.max_delay),
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: config.jitter,
        }
    }

    /// Retries still available
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Delay before the next retry, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let base = self.delay;
        self.delay = Duration::try_from_secs_f64(base.as_secs_f64() * self.multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay));

        let delay = if self.jitter { add_jitter(base) } else { base };
        Some(delay.min(self.max_delay))
    }
}

/// Sleep for `delay`, returning early with `false` if `cancel` fires
pub async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// result lies between `delay` and `2 * delay` (before the caller's cap).
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}
