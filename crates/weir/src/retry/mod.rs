//! Retry delay policies: bounded attempts with backoff + jitter.

mod backoff;
mod jitter;

use std::time::Duration;

use derive_builder::Builder;

pub use backoff::Backoff;
pub use jitter::{DelayState, Jitter};

/// Retry configuration for a node or a whole pipeline.
///
/// `max_attempts` bounds item-level retries, `max_node_restart_attempts` and
/// `max_materialized_items` govern node restarts under the resilient
/// strategy. Pipeline-scoped options act as defaults; node-scoped options
/// override them.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(
    pattern = "owned",
    setter(into, strip_option, prefix = "with"),
    build_fn(validate = "Self::validate")
)]
pub struct RetryOptions {
    /// Maximum processing attempts per item, including the first.
    #[builder(default = "3")]
    pub max_attempts: u32,
    /// Backoff family producing the base delay per attempt.
    #[builder(default)]
    pub backoff: Backoff,
    /// Jitter applied after the backoff value is computed.
    #[builder(default)]
    pub jitter: Jitter,
    /// Maximum node restarts before the pipeline fails.
    #[builder(default = "1")]
    pub max_node_restart_attempts: u32,
    /// Maximum pending items buffered for restart replay.
    #[builder(default = "64")]
    pub max_materialized_items: usize,
}

impl RetryOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_attempts.is_some_and(|n| n == 0) {
            return Err("max_attempts must be at least 1".into());
        }
        if self.max_materialized_items.is_some_and(|n| n == 0) {
            return Err("max_materialized_items must be greater than 0".into());
        }
        Ok(())
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptionsBuilder::default()
            .build()
            .expect("default retry options are valid")
    }
}

impl RetryOptions {
    /// Returns a builder for retry options.
    pub fn builder() -> RetryOptionsBuilder {
        RetryOptionsBuilder::default()
    }

    /// Computes the delay before the given retry attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32, state: &mut DelayState) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt), state)
    }

    /// Returns whether another attempt is allowed after `attempt` tries.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = RetryOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert!(options.allows_attempt(2));
        assert!(!options.allows_attempt(3));
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let err = RetryOptions::builder().with_max_attempts(0u32).build();
        assert!(err.is_err());
    }

    #[test]
    fn test_delay_respects_backoff_bound() {
        let options = RetryOptions::builder()
            .with_backoff(Backoff::fixed(Duration::from_millis(80)).unwrap())
            .with_jitter(Jitter::Full)
            .build()
            .unwrap();
        let mut state = DelayState::new();
        for attempt in 1..=3 {
            let delay = options.delay_for(attempt, &mut state);
            assert!(delay <= Duration::from_millis(80));
        }
    }

    #[test]
    fn test_no_jitter_is_exact() {
        let options = RetryOptions::builder()
            .with_backoff(Backoff::fixed(Duration::from_millis(25)).unwrap())
            .with_jitter(Jitter::None)
            .build()
            .unwrap();
        let mut state = DelayState::new();
        assert_eq!(options.delay_for(1, &mut state), Duration::from_millis(25));
    }
}
