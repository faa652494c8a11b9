//! # Retry policy for task envelopes.
//!
//! [`RetryPolicy`] bundles the retry budget with the [`BackoffPolicy`] used to
//! space attempts. It travels inside every envelope so a retry never needs to
//! look anything up.
//!
//! ```text
//! attempt 1 ── Err(Fail) ──► retries=0 < max? ──► successor(retries=1, delay=next(1))
//! attempt 2 ── Err(Fail) ──► retries=1 < max? ──► successor(retries=2, delay=next(2))
//! attempt 3 ── Err(Fail) ──► retries=2 = max  ──► FAILED
//! ```

use crate::policies::BackoffPolicy;

/// Retry budget plus backoff spacing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (`0` = run once).
    pub max_retries: u32,
    /// Delay strategy between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    /// Returns `max_retries = 3` with [`BackoffPolicy::default`].
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given budget and backoff.
    pub fn new(max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Returns `true` if an envelope that already used `retries` retries may retry again.
    #[inline]
    pub fn allows(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Total number of attempts this policy permits.
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
