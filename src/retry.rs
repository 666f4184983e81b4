//! Attempt/timeout policy for lookups.
//!
//! A lookup runs at most `max_attempts` broadcast windows. Each window
//! waits for replies; a new window only starts when the previous one
//! gathered nothing. With [`Backoff::Fixed`] every window is
//! `timeout_per_attempt`; with [`Backoff::Exponential`] each window is
//! `factor` times longer than the last, capped at `max_timeout`.
//!
//! Every policy is finite: [`RetryPolicy::max_total_wait`] bounds how long a
//! lookup can take.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of broadcast attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Growth of the per-attempt window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Every attempt waits `timeout_per_attempt`.
    #[default]
    Fixed,
    /// Attempt `n` (0-based) waits `timeout_per_attempt * factor^n`, capped.
    Exponential {
        factor: f64,
        #[serde(with = "millis")]
        max_timeout: Duration,
    },
}

/// How many windows a lookup gets and how long each one is.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub timeout_per_attempt: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed-window policy.
    pub fn fixed(timeout_per_attempt: Duration, max_attempts: u32) -> Self {
        Self {
            timeout_per_attempt,
            max_attempts,
            backoff: Backoff::Fixed,
        }
    }

    /// Doubling windows capped at `max_timeout`.
    pub fn exponential(
        timeout_per_attempt: Duration,
        max_attempts: u32,
        max_timeout: Duration,
    ) -> Self {
        Self {
            timeout_per_attempt,
            max_attempts,
            backoff: Backoff::Exponential {
                factor: 2.0,
                max_timeout,
            },
        }
    }

    /// Reject policies that could never complete an attempt.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_per_attempt.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "timeout_per_attempt must be non-zero".to_string(),
            ));
        }
        if let Backoff::Exponential { factor, .. } = self.backoff {
            if !factor.is_finite() || factor < 1.0 {
                return Err(DiscoveryError::InvalidConfig(format!(
                    "backoff factor {} must be a finite number >= 1",
                    factor
                )));
            }
        }
        Ok(())
    }

    /// Window length for the 0-based `attempt`.
    pub fn window(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.timeout_per_attempt,
            Backoff::Exponential {
                factor,
                max_timeout,
            } => {
                let cap = max_timeout.max(self.timeout_per_attempt);
                let scale = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let nanos = self.timeout_per_attempt.as_nanos() as f64 * scale;
                if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
                    cap
                } else {
                    Duration::from_nanos(nanos.round() as u64)
                }
            }
        }
    }

    /// Every window in attempt order.
    pub fn windows(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |n| self.window(n))
    }

    /// Upper bound on the time a lookup can wait for replies. Saturates at
    /// `Duration::MAX`.
    pub fn max_total_wait(&self) -> Duration {
        self.windows().fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_TIMEOUT, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Serde helper storing a `Duration` as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
