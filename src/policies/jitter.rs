//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays to prevent synchronized
//! retry storms when many tasks fail at the same moment.
//!
//! - [`JitterPolicy::None`]: no randomization, predictable delays
//! - [`JitterPolicy::Full`]: random delay in [0, delay] (most aggressive)
//! - [`JitterPolicy::Equal`]: delay/2 + random[0, delay/2] (balanced)
//! - [`JitterPolicy::Proportional`]: delay ± fraction × delay, uniform (default)

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    #[default]
    None,

    /// Full jitter: random delay in [0, delay].
    Full,

    /// Equal jitter: delay/2 + random[0, delay/2].
    Equal,

    /// Symmetric jitter: delay widened by ± `fraction × delay`, drawn uniformly.
    ///
    /// `fraction` is clamped to `[0.0, 1.0]`.
    Proportional {
        /// Relative spread around the base delay.
        fraction: f64,
    },
}

impl JitterPolicy {
    /// Builds the symmetric policy from a configured fraction (`0` disables jitter).
    pub fn proportional(fraction: f64) -> Self {
        if fraction.is_finite() && fraction > 0.0 {
            JitterPolicy::Proportional { fraction }
        } else {
            JitterPolicy::None
        }
    }

    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match *self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
            JitterPolicy::Proportional { fraction } => proportional_jitter(delay, fraction),
        }
    }
}

/// Full jitter: random[0, delay]
fn full_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ms))
}

/// Equal jitter: delay/2 + random[0, delay/2]
fn equal_jitter(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::rng().random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}

/// Symmetric jitter: delay ± fraction × delay
fn proportional_jitter(delay: Duration, fraction: f64) -> Duration {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let secs = delay.as_secs_f64();
    let spread = secs * fraction;
    if spread <= 0.0 {
        return delay;
    }
    let jittered = rand::rng().random_range((secs - spread)..=(secs + spread));
    Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(Duration::MAX)
}
