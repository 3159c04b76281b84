//! Retry policy for transient transport failures.
//!
//! The policy is a plain value consulted by the acquisition controller's
//! polling loop rather than an ad hoc loop counter, so the retry behavior
//! can be tuned and tested on its own.

use std::time::Duration;

/// Defines how many times a transient failure is retried and how long to
/// wait between attempts.
///
/// `max_attempts` counts retries, not total tries: an operation with
/// `max_attempts = 3` runs at most four times. Set it to 0 to disable
/// retries entirely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial try.
    pub max_attempts: u32,

    /// Constant delay between attempts.
    pub backoff_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with the given retry count and backoff delay.
    pub fn new(max_attempts: u32, backoff_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    /// Three retries with 100 ms between attempts.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}
