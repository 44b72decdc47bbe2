//! Jitter applied on top of a computed backoff delay.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Randomization applied to a backoff value to spread retry storms.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Jitter {
    /// No randomization; the backoff value is used verbatim.
    None,
    /// Uniform in `[0, base)`.
    #[default]
    Full,
    /// `base / 2 + U[0, base / 2)`.
    Equal,
    /// Decorrelated: each delay is drawn from `[base, upper)` where the
    /// upper bound is `min(max_delay, previous × multiplier)`.
    Decorrelated {
        /// Growth factor for the upper bound (must be at least 1).
        multiplier: f64,
        /// Hard cap for any produced delay.
        max_delay: Duration,
    },
}

/// Mutable state threaded through successive delay computations.
///
/// Only decorrelated jitter uses it; the other families are stateless.
#[derive(Debug, Clone, Default)]
pub struct DelayState {
    previous: Option<Duration>,
}

impl DelayState {
    /// Creates a fresh state for a new retry sequence.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Jitter {
    /// Creates a decorrelated jitter.
    pub fn decorrelated(multiplier: f64, max_delay: Duration) -> Result<Self> {
        if multiplier < 1.0 {
            return Err(Error::InvalidConfiguration(format!(
                "decorrelated jitter multiplier ({multiplier}) must be at least 1"
            )));
        }
        if max_delay.is_zero() {
            return Err(Error::InvalidConfiguration(
                "decorrelated jitter max delay must be positive".into(),
            ));
        }
        Ok(Self::Decorrelated {
            multiplier,
            max_delay,
        })
    }

    /// Applies this jitter to a computed backoff value.
    ///
    /// A zero base always yields zero, regardless of family.
    pub fn apply(&self, base: Duration, state: &mut DelayState) -> Duration {
        if base.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            Self::None => base,
            Self::Full => base.mul_f64(rng.random_range(0.0..1.0)),
            Self::Equal => {
                let half = base / 2;
                half + half.mul_f64(rng.random_range(0.0..1.0))
            }
            Self::Decorrelated {
                multiplier,
                max_delay,
            } => {
                let previous = state.previous.unwrap_or(base);
                let upper = previous.mul_f64(*multiplier).min(*max_delay);
                let delay = if upper > base {
                    let secs = rng.random_range(base.as_secs_f64()..upper.as_secs_f64());
                    Duration::from_secs_f64(secs)
                } else {
                    upper
                };
                state.previous = Some(delay);
                delay
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_base_yields_zero() {
        let mut state = DelayState::new();
        for jitter in [
            Jitter::None,
            Jitter::Full,
            Jitter::Equal,
            Jitter::decorrelated(3.0, Duration::from_secs(10)).unwrap(),
        ] {
            assert_eq!(jitter.apply(Duration::ZERO, &mut state), Duration::ZERO);
        }
    }

    #[test]
    fn test_full_jitter_stays_below_base() {
        let base = Duration::from_millis(100);
        let mut state = DelayState::new();
        for _ in 0..64 {
            let delay = Jitter::Full.apply(base, &mut state);
            assert!(delay < base);
        }
    }

    #[test]
    fn test_equal_jitter_stays_in_upper_half() {
        let base = Duration::from_millis(100);
        let mut state = DelayState::new();
        for _ in 0..64 {
            let delay = Jitter::Equal.apply(base, &mut state);
            assert!(delay >= base / 2);
            assert!(delay < base);
        }
    }

    #[test]
    fn test_decorrelated_jitter_respects_cap() {
        let base = Duration::from_millis(50);
        let cap = Duration::from_millis(120);
        let jitter = Jitter::decorrelated(3.0, cap).unwrap();
        let mut state = DelayState::new();
        for _ in 0..64 {
            let delay = jitter.apply(base, &mut state);
            assert!(delay >= base);
            assert!(delay <= cap);
        }
    }

    #[test]
    fn test_invalid_multiplier_is_rejected() {
        assert!(Jitter::decorrelated(0.9, Duration::from_secs(1)).is_err());
    }
}
