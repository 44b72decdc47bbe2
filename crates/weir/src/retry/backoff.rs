//! Backoff families for retry delays.

use std::time::Duration;

use crate::error::{Error, Result};

/// Base delay progression for retries, before jitter is applied.
///
/// All families clamp at their configured maximum, and attempt `0` (the
/// first try, before any failure) always maps to a zero delay.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay for every retry.
    Fixed {
        /// Delay between attempts.
        delay: Duration,
    },
    /// Delay grows by a fixed increment per retry.
    Linear {
        /// Delay before the first retry.
        base: Duration,
        /// Added per subsequent retry.
        increment: Duration,
        /// Upper clamp.
        max: Duration,
    },
    /// Delay grows by a multiplicative factor per retry.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Factor applied per subsequent retry (must be at least 1).
        multiplier: f64,
        /// Upper clamp.
        max: Duration,
    },
}

impl Backoff {
    /// Creates a fixed backoff.
    pub fn fixed(delay: Duration) -> Result<Self> {
        if delay.is_zero() {
            return Err(Error::InvalidConfiguration(
                "fixed backoff delay must be positive".into(),
            ));
        }
        Ok(Self::Fixed { delay })
    }

    /// Creates a linear backoff.
    pub fn linear(base: Duration, increment: Duration, max: Duration) -> Result<Self> {
        if base.is_zero() {
            return Err(Error::InvalidConfiguration(
                "linear backoff base delay must be positive".into(),
            ));
        }
        if max < base {
            return Err(Error::InvalidConfiguration(format!(
                "linear backoff max ({max:?}) must not be below its base ({base:?})"
            )));
        }
        Ok(Self::Linear {
            base,
            increment,
            max,
        })
    }

    /// Creates an exponential backoff.
    pub fn exponential(base: Duration, multiplier: f64, max: Duration) -> Result<Self> {
        if base.is_zero() {
            return Err(Error::InvalidConfiguration(
                "exponential backoff base delay must be positive".into(),
            ));
        }
        if multiplier < 1.0 {
            return Err(Error::InvalidConfiguration(format!(
                "exponential backoff multiplier ({multiplier}) must be at least 1"
            )));
        }
        if max < base {
            return Err(Error::InvalidConfiguration(format!(
                "exponential backoff max ({max:?}) must not be below its base ({base:?})"
            )));
        }
        Ok(Self::Exponential {
            base,
            multiplier,
            max,
        })
    }

    /// Returns the delay before the given retry attempt (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self {
            Self::Fixed { delay } => *delay,
            Self::Linear {
                base,
                increment,
                max,
            } => (*base + *increment * (attempt - 1)).min(*max),
            Self::Exponential {
                base,
                multiplier,
                max,
            } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                Duration::from_secs_f64(base.as_secs_f64() * factor).min(*max)
            }
        }
    }
}

impl Default for Backoff {
    /// Exponential, 500 ms doubling up to 30 s.
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}
