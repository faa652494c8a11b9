//! # Backoff policy for retrying tasks.
//!
//! [`BackoffPolicy`] controls how retry delays grow after repeated failures.
//! It is parameterized by:
//! - [`BackoffPolicy::base`] the exponential base (seconds);
//! - [`BackoffPolicy::cap`] the maximum delay before jitter;
//! - [`BackoffPolicy::min_delay`] the floor applied after jitter;
//! - [`BackoffPolicy::jitter`] the randomization strategy.
//!
//! The delay for retry `n` is `min(cap, base^n)` seconds, then jitter is applied,
//! then the result is floored at `min_delay`. The base delay is derived purely
//! from the retry number, so jitter output never feeds back into later delays.
//! Every delay is bounded by [`MAX_RETRY_DELAY`].
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use taskhive::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     base: 2.0,
//!     cap: Duration::from_secs(10),
//!     min_delay: Duration::from_millis(50),
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(1), Duration::from_secs(2));
//! assert_eq!(backoff.next(2), Duration::from_secs(4));
//! // 2^10 = 1024s → capped at 10s
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Upper bound on any computed retry delay (30 years).
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Exponential base in seconds (values below `1.0` are treated as `1.0`).
    pub base: f64,
    /// Maximum delay before jitter is applied.
    pub cap: Duration,
    /// Lower bound applied to every computed delay.
    pub min_delay: Duration,
    /// Jitter policy to prevent synchronized retries.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a strategy with:
    /// - `base = 2.0`;
    /// - `cap = 30s`;
    /// - `min_delay = 50ms`;
    /// - `jitter = ±10%`.
    fn default() -> Self {
        Self {
            base: 2.0,
            cap: Duration::from_secs(30),
            min_delay: Duration::from_millis(50),
            jitter: JitterPolicy::Proportional { fraction: 0.1 },
        }
    }
}

impl BackoffPolicy {
    /// Builds a policy from the float-seconds form used by configuration.
    ///
    /// A cap that is not a positive number falls back to `min_delay`; one
    /// beyond [`MAX_RETRY_DELAY`] saturates there.
    pub fn from_secs(base: f64, cap_secs: f64, min_delay: Duration, jitter: JitterPolicy) -> Self {
        let cap = if cap_secs.is_finite() && cap_secs > 0.0 {
            Duration::try_from_secs_f64(cap_secs)
                .map_or(MAX_RETRY_DELAY, |cap| cap.min(MAX_RETRY_DELAY))
        } else {
            min_delay
        };
        Self {
            base,
            cap,
            min_delay,
            jitter,
        }
    }

    /// Returns the delay before retry number `retries` without jitter.
    ///
    /// Non-decreasing in `retries`, bounded by `max(cap, min_delay)` and by
    /// [`MAX_RETRY_DELAY`].
    pub fn base_delay(&self, retries: u32) -> Duration {
        let cap = self.cap.min(MAX_RETRY_DELAY);
        let exp = retries.min(i32::MAX as u32) as i32;
        let unclamped = self.base.max(1.0).powi(exp);

        let capped = if !unclamped.is_finite() || unclamped > cap.as_secs_f64() {
            cap
        } else {
            Duration::try_from_secs_f64(unclamped).map_or(cap, |d| d.min(cap))
        };
        capped.max(self.min_delay).min(MAX_RETRY_DELAY)
    }

    /// Computes the delay before retry number `retries` (1 for the first retry).
    ///
    /// Jitter is applied to the capped base and the result is floored at
    /// [`BackoffPolicy::min_delay`], then bounded by [`MAX_RETRY_DELAY`].
    pub fn next(&self, retries: u32) -> Duration {
        let base = self.base_delay(retries);
        self.jitter
            .apply(base)
            .max(self.min_delay)
            .min(MAX_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(base: f64, cap: Duration) -> BackoffPolicy {
        BackoffPolicy {
            base,
            cap,
            min_delay: Duration::from_millis(50),
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = plain(2.0, Duration::from_secs(60));

        assert_eq!(policy.next(1), Duration::from_secs(2));
        assert_eq!(policy.next(2), Duration::from_secs(4));
        assert_eq!(policy.next(3), Duration::from_secs(8));
        assert_eq!(policy.next(4), Duration::from_secs(16));
    }

    #[test]
    fn test_clamped_to_cap() {
        let policy = plain(2.0, Duration::from_secs(10));
        assert_eq!(policy.next(3), Duration::from_secs(8));
        assert_eq!(policy.next(4), Duration::from_secs(10));
        assert_eq!(policy.next(100), Duration::from_secs(10));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_cap() {
        let policy = plain(2.0, Duration::from_secs(10));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_non_decreasing_up_to_cap() {
        let policy = plain(1.7, Duration::from_secs(45));
        let mut prev = Duration::ZERO;
        for retries in 0..40 {
            let delay = policy.next(retries);
            assert!(delay >= prev, "retries {retries}: {delay:?} < {prev:?}");
            assert!(delay <= Duration::from_secs(45));
            prev = delay;
        }
    }

    #[test]
    fn test_base_below_one_is_constant() {
        let policy = plain(0.5, Duration::from_secs(10));
        assert_eq!(policy.next(1), Duration::from_secs(1));
        assert_eq!(policy.next(5), Duration::from_secs(1));
    }

    #[test]
    fn test_min_delay_floor() {
        let policy = BackoffPolicy {
            base: 1.0,
            cap: Duration::from_millis(10),
            min_delay: Duration::from_millis(50),
            jitter: JitterPolicy::Full,
        };
        for retries in 0..50 {
            assert!(policy.next(retries) >= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_proportional_jitter_bounds() {
        let policy = BackoffPolicy {
            base: 2.0,
            cap: Duration::from_secs(10),
            min_delay: Duration::from_millis(50),
            jitter: JitterPolicy::Proportional { fraction: 0.25 },
        };
        for _ in 0..200 {
            let delay = policy.next(2);
            assert!(delay >= Duration::from_secs(3), "{delay:?}");
            assert!(delay <= Duration::from_secs(5), "{delay:?}");
        }
    }

    #[test]
    fn test_from_secs_handles_bad_cap() {
        let policy = BackoffPolicy::from_secs(
            2.0,
            f64::NAN,
            Duration::from_millis(50),
            JitterPolicy::None,
        );
        assert_eq!(policy.cap, Duration::from_millis(50));
        assert_eq!(policy.next(3), Duration::from_millis(50));
    }

    #[test]
    fn test_from_secs_saturates_huge_cap() {
        let policy = BackoffPolicy::from_secs(
            2.0,
            1e30,
            Duration::from_millis(50),
            JitterPolicy::proportional(0.5),
        );
        assert_eq!(policy.cap, MAX_RETRY_DELAY);
        assert_eq!(policy.base_delay(3), Duration::from_secs(8));
        assert!(policy.next(u32::MAX) <= MAX_RETRY_DELAY);
    }

    #[test]
    fn test_oversized_fields_stay_bounded() {
        let policy = BackoffPolicy {
            base: 10.0,
            cap: Duration::MAX,
            min_delay: Duration::MAX,
            jitter: JitterPolicy::Proportional { fraction: 1.0 },
        };
        assert_eq!(policy.next(1), MAX_RETRY_DELAY);
        assert_eq!(policy.next(u32::MAX), MAX_RETRY_DELAY);
    }
}
